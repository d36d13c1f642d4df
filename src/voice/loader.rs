use std::thread;

use crossbeam_channel::{Receiver, TryRecvError};

use crate::{
    utils::{decoder::decode_sample, sample::DecodedSample},
    Error,
};

// -------------------------------------------------------------------------------------------------

/// A sample decode operation, running on a worker thread.
///
/// The decoded sample must be treated as unavailable until the task resolved via [`Self::poll`]
/// or [`Self::wait`].
#[derive(Debug)]
pub struct DecodeTask {
    receiver: Receiver<Result<DecodedSample, Error>>,
}

impl DecodeTask {
    /// Start decoding the given encoded audio file content.
    pub fn spawn(bytes: Vec<u8>) -> Result<Self, Error> {
        let (sender, receiver) = crossbeam_channel::bounded(1);
        thread::Builder::new()
            .name("sample_decoder".to_string())
            .spawn(move || {
                log::debug!("Decoding sample ({} bytes)...", bytes.len());
                let result = decode_sample(bytes);
                if sender.send(result).is_err() {
                    log::debug!("Sample decode task got dropped before it finished");
                }
            })?;
        Ok(Self { receiver })
    }

    /// Check if decoding finished, without blocking.
    pub fn poll(&mut self) -> Option<Result<DecodedSample, Error>> {
        match self.receiver.try_recv() {
            Ok(result) => Some(result),
            Err(TryRecvError::Empty) => None,
            Err(TryRecvError::Disconnected) => Some(Err(Self::disconnected())),
        }
    }

    /// Block until decoding finished.
    pub fn wait(self) -> Result<DecodedSample, Error> {
        self.receiver
            .recv()
            .unwrap_or_else(|_| Err(Self::disconnected()))
    }

    fn disconnected() -> Error {
        Error::SendError("sample decoder thread terminated unexpectedly".to_string())
    }
}

// -------------------------------------------------------------------------------------------------
