use std::io;

use symphonia::core::{
    audio::SampleBuffer,
    codecs::{Decoder, DecoderOptions},
    errors::Error as SymphoniaError,
    formats::{FormatOptions, FormatReader},
    io::MediaSourceStream,
    meta::MetadataOptions,
    probe::Hint,
};

use super::sample::DecodedSample;
use crate::error::Error;

// -------------------------------------------------------------------------------------------------

/// Decodes encoded audio file content (wav, flac, ogg, mp3, ...) via Symphonia.
pub struct AudioDecoder {
    track_id: u32, // Internal track index.
    decoder: Box<dyn Decoder>,
    format: Box<dyn FormatReader>,
}

impl AudioDecoder {
    /// Create a new decoder from the given encoded file buffer.
    pub fn from_buffer(buffer: Vec<u8>) -> Result<Self, Error> {
        let cursor = Box::new(io::Cursor::new(buffer));
        let source_stream = MediaSourceStream::new(cursor, Default::default());
        Self::from_source_stream(source_stream)
    }

    /// Create a new decoder from the given Symphonia MediaSourceStream
    pub fn from_source_stream(source_stream: MediaSourceStream) -> Result<Self, Error> {
        // Unused hint to help the format registry guess what format reader is appropriate.
        let hint = Hint::new();

        // Use the default options when reading and decoding.
        let format_opts: FormatOptions = Default::default();
        let metadata_opts: MetadataOptions = Default::default();
        let decoder_opts: DecoderOptions = Default::default();

        // Probe the media source stream for a format.
        let probed = symphonia::default::get_probe()
            .format(&hint, source_stream, &format_opts, &metadata_opts)
            .map_err(|_| Error::MediaFileProbeError)?;

        // Get the format reader yielded by the probe operation.
        let format = probed.format;

        // Get the default track.
        let track = format.default_track().ok_or(Error::MediaFileNotFound)?;
        let track_id = track.id;

        // Create a decoder for the track.
        let decoder = symphonia::default::get_codecs()
            .make(&track.codec_params, &decoder_opts)
            .map_err(|err| Error::AudioDecodingError(Box::new(err)))?;

        Ok(Self {
            track_id,
            decoder,
            format,
        })
    }

    /// Decode all remaining packets into a planar sample buffer.
    pub fn decode_all(mut self) -> Result<DecodedSample, Error> {
        let mut sample_rate = self.decoder.codec_params().sample_rate.unwrap_or(0);
        let mut channels: Vec<Vec<f32>> = Vec::new();
        let mut decode_buffer: Option<SampleBuffer<f32>> = None;

        loop {
            // Demux an encoded packet from the media format.
            let packet = match self.format.next_packet() {
                Ok(packet) => packet,
                Err(SymphoniaError::IoError(io)) if io.kind() == io::ErrorKind::UnexpectedEof => {
                    break; // End of this stream.
                }
                Err(SymphoniaError::ResetRequired) => {
                    // Track list changed: we only decode the first default track.
                    break;
                }
                Err(err) => {
                    log::error!("format error: {err}");
                    return Err(err.into());
                }
            };
            // If the packet does not belong to the selected track, skip over it.
            if packet.track_id() != self.track_id {
                continue;
            }
            // Decode the packet into an audio buffer.
            match self.decoder.decode(&packet) {
                Ok(decoded) => {
                    let spec = *decoded.spec();
                    let channel_count = spec.channels.count();
                    if channel_count == 0 {
                        continue;
                    }
                    if channels.is_empty() {
                        channels = vec![Vec::new(); channel_count];
                        sample_rate = spec.rate;
                    }
                    let samples = decode_buffer.get_or_insert_with(|| {
                        SampleBuffer::<f32>::new(decoded.capacity() as u64, spec)
                    });
                    if samples.capacity() < decoded.capacity() * channel_count {
                        *samples = SampleBuffer::<f32>::new(decoded.capacity() as u64, spec);
                    }
                    // Interleave the samples into the buffer, then deinterleave into our channels.
                    samples.copy_interleaved_ref(decoded);
                    for frame in samples.samples().chunks_exact(channel_count) {
                        for (channel, sample) in channels.iter_mut().zip(frame) {
                            channel.push(*sample);
                        }
                    }
                }
                Err(SymphoniaError::IoError(err)) => {
                    // The packet failed to decode due to an IO error, skip the packet.
                    log::warn!("io decode error: {err}");
                    continue;
                }
                Err(SymphoniaError::DecodeError(err)) => {
                    // The packet failed to decode due to invalid data, skip the packet.
                    log::warn!("decode error: {err}");
                    continue;
                }
                Err(err) => {
                    log::error!("fatal decode error: {err}");
                    return Err(err.into());
                }
            };
        }

        if channels.first().is_none_or(|c| c.is_empty()) || sample_rate == 0 {
            return Err(Error::AudioDecodingError(Box::new(
                SymphoniaError::DecodeError("file contains no audio frames"),
            )));
        }
        Ok(DecodedSample::new(sample_rate, channels))
    }
}

// -------------------------------------------------------------------------------------------------

/// Decode the given encoded audio file content into a planar sample buffer.
pub fn decode_sample(bytes: Vec<u8>) -> Result<DecodedSample, Error> {
    AudioDecoder::from_buffer(bytes)?.decode_all()
}

// -------------------------------------------------------------------------------------------------
