use super::receiver::BroadcastReceiver;
use crate::error::{IpcError, IpcResult};
use crate::record::max_msg_length;

/// Receiver that copies each record out of the log before handing it over, so
/// the handler never sees a torn message.
pub struct CopyBroadcastReceiver<'a> {
    receiver: BroadcastReceiver<'a>,
    scratch: Vec<u8>,
}

impl<'a> CopyBroadcastReceiver<'a> {
    /// Wraps `receiver` with a scratch buffer large enough for any message
    /// the log accepts.
    pub fn new(receiver: BroadcastReceiver<'a>) -> Self {
        let capacity = max_msg_length(receiver.capacity());
        Self::with_scratch_capacity(receiver, capacity)
    }

    pub fn with_scratch_capacity(receiver: BroadcastReceiver<'a>, capacity: usize) -> Self {
        Self {
            receiver,
            scratch: vec![0u8; capacity],
        }
    }

    /// Underlying receiver, for its lap count.
    #[inline]
    pub fn receiver(&self) -> &BroadcastReceiver<'a> {
        &self.receiver
    }

    /// Delivers at most one message to `handler`.
    ///
    /// Returns the number of messages delivered, 0 or 1.
    ///
    /// # Errors
    /// - `UnableToKeepUp` if the receiver was lapped during this call or the
    ///   record was overwritten while being copied. The receiver has already
    ///   moved on, so the next call resumes from the latest record.
    /// - `ScratchBufferTooSmall` if the record does not fit the scratch buffer
    pub fn receive<F>(&mut self, mut handler: F) -> IpcResult<usize>
    where
        F: FnMut(i32, &[u8]),
    {
        let last_seen_lapped_count = self.receiver.lapped_count();

        if !self.receiver.receive_next() {
            return Ok(0);
        }
        if last_seen_lapped_count != self.receiver.lapped_count() {
            return Err(IpcError::UnableToKeepUp);
        }

        let length = self.receiver.length();
        if length > self.scratch.len() {
            return Err(IpcError::ScratchBufferTooSmall {
                required: length,
                capacity: self.scratch.len(),
            });
        }

        let msg_type_id = self.receiver.type_id();
        let message = &mut self.scratch[..length];
        self.receiver
            .buffer()
            .get_bytes(self.receiver.offset(), message);

        if !self.receiver.validate() {
            return Err(IpcError::UnableToKeepUp);
        }

        handler(msg_type_id, message);
        Ok(1)
    }
}
