//! HTTP/2 flow control
//!
//! Connection- and stream-level windows from RFC 7540 Section 5.2. The
//! send window gates outbound DATA; the receive window tracks how much the
//! peer may still send before we owe a WINDOW_UPDATE.

use super::error::{Error, Result};
use super::DEFAULT_INITIAL_WINDOW_SIZE;

/// Maximum window size (2^31 - 1)
const MAX_WINDOW_SIZE: i64 = 0x7FFF_FFFF;

/// One flow control window
///
/// The available amount is signed: a SETTINGS_INITIAL_WINDOW_SIZE decrease
/// can leave a window over-committed.
#[derive(Debug, Clone)]
pub struct FlowControlWindow {
    initial: u32,
    avail: i64,
}

impl FlowControlWindow {
    /// A window of the RFC default size
    pub fn new() -> Self {
        Self::with_initial_size(DEFAULT_INITIAL_WINDOW_SIZE)
    }

    /// A window of a specific initial size
    pub fn with_initial_size(initial: u32) -> Self {
        FlowControlWindow {
            initial,
            avail: i64::from(initial),
        }
    }

    /// Current window size
    pub fn size(&self) -> i64 {
        self.avail
    }

    /// Initial window size
    pub fn initial_size(&self) -> u32 {
        self.initial
    }

    /// Whether any capacity remains
    pub fn has_capacity(&self) -> bool {
        self.avail > 0
    }

    /// Consume capacity for sending.
    ///
    /// Returns the amount actually granted, possibly less than requested
    /// and zero when the window is exhausted.
    pub fn consume(&mut self, amount: usize) -> usize {
        let granted = (amount as i64).min(self.avail).max(0) as usize;
        self.avail -= granted as i64;
        granted
    }

    /// Apply a WINDOW_UPDATE increment
    pub fn increase(&mut self, increment: u32) -> Result<i64> {
        if increment == 0 {
            return Err(Error::FlowControl(
                "Window update increment must be non-zero".to_string(),
            ));
        }

        let grown = self.avail + i64::from(increment);
        if grown > MAX_WINDOW_SIZE {
            return Err(Error::FlowControl(format!(
                "Window size {} exceeds maximum (2^31-1)",
                grown
            )));
        }

        self.avail = grown;
        Ok(self.avail)
    }

    /// Account for received data
    pub fn decrease(&mut self, amount: usize) {
        self.avail -= amount as i64;
    }

    /// How much has been consumed relative to the initial size
    pub fn consumed(&self) -> i64 {
        i64::from(self.initial) - self.avail
    }

    /// Restore the window to its initial size, returning the increment the
    /// peer should be granted
    pub fn replenish(&mut self) -> u32 {
        let owed = self.consumed().max(0) as u32;
        self.avail = i64::from(self.initial);
        owed
    }

    /// Adjust for a changed SETTINGS_INITIAL_WINDOW_SIZE
    pub fn update_initial_size(&mut self, new_initial: u32) -> Result<()> {
        let adjusted = self.avail + i64::from(new_initial) - i64::from(self.initial);
        if adjusted > MAX_WINDOW_SIZE {
            return Err(Error::FlowControl(format!(
                "New window size {} exceeds maximum (2^31-1)",
                adjusted
            )));
        }

        self.initial = new_initial;
        self.avail = adjusted;
        Ok(())
    }
}

impl Default for FlowControlWindow {
    fn default() -> Self {
        Self::new()
    }
}

/// Connection-level flow control (stream 0)
#[derive(Debug, Default)]
pub struct ConnectionFlowControl {
    send: FlowControlWindow,
    recv: FlowControlWindow,
}

impl ConnectionFlowControl {
    /// Connection windows at the RFC default size
    pub fn new() -> Self {
        ConnectionFlowControl::default()
    }

    /// Send window (gates outbound DATA)
    pub fn send_window_mut(&mut self) -> &mut FlowControlWindow {
        &mut self.send
    }

    /// Receive window (tracks inbound DATA)
    pub fn recv_window_mut(&mut self) -> &mut FlowControlWindow {
        &mut self.recv
    }

    /// Current send capacity
    pub fn send_capacity(&self) -> i64 {
        self.send.size()
    }
}

/// Stream-level flow control
#[derive(Debug)]
pub struct StreamFlowControl {
    stream_id: u32,
    send: FlowControlWindow,
    recv: FlowControlWindow,
}

impl StreamFlowControl {
    /// Stream windows at the RFC default size
    pub fn new(stream_id: u32) -> Self {
        Self::with_initial_sizes(
            stream_id,
            DEFAULT_INITIAL_WINDOW_SIZE,
            DEFAULT_INITIAL_WINDOW_SIZE,
        )
    }

    /// Stream windows with explicit initial sizes
    pub fn with_initial_sizes(stream_id: u32, send_size: u32, recv_size: u32) -> Self {
        StreamFlowControl {
            stream_id,
            send: FlowControlWindow::with_initial_size(send_size),
            recv: FlowControlWindow::with_initial_size(recv_size),
        }
    }

    /// Stream these windows belong to
    pub fn stream_id(&self) -> u32 {
        self.stream_id
    }

    /// Send window (gates outbound DATA)
    pub fn send_window_mut(&mut self) -> &mut FlowControlWindow {
        &mut self.send
    }

    /// Receive window (tracks inbound DATA)
    pub fn recv_window_mut(&mut self) -> &mut FlowControlWindow {
        &mut self.recv
    }

    /// Current send capacity
    pub fn send_capacity(&self) -> i64 {
        self.send.size()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_window_size() {
        let window = FlowControlWindow::new();
        assert_eq!(window.size(), 65535);
        assert!(window.has_capacity());
    }

    #[test]
    fn test_consume() {
        let mut window = FlowControlWindow::with_initial_size(100);

        assert_eq!(window.consume(40), 40);
        assert_eq!(window.size(), 60);

        // Requests beyond capacity are clamped
        assert_eq!(window.consume(100), 60);
        assert_eq!(window.size(), 0);
        assert_eq!(window.consume(1), 0);
    }

    #[test]
    fn test_increase() {
        let mut window = FlowControlWindow::with_initial_size(10);
        window.consume(10);

        assert_eq!(window.increase(5).unwrap(), 5);
        assert!(window.increase(0).is_err());
    }

    #[test]
    fn test_increase_overflow() {
        let mut window = FlowControlWindow::with_initial_size(0x7FFF_FFFF);
        assert!(window.increase(1).is_err());
    }

    #[test]
    fn test_replenish() {
        let mut window = FlowControlWindow::with_initial_size(100);
        window.decrease(30);

        assert_eq!(window.consumed(), 30);
        assert_eq!(window.replenish(), 30);
        assert_eq!(window.size(), 100);
        assert_eq!(window.replenish(), 0);
    }

    #[test]
    fn test_update_initial_size() {
        let mut window = FlowControlWindow::with_initial_size(100);
        window.consume(50);

        // Shrinking the initial size can leave the window negative
        window.update_initial_size(20).unwrap();
        assert_eq!(window.size(), -30);

        window.update_initial_size(120).unwrap();
        assert_eq!(window.size(), 70);
    }

    #[test]
    fn test_connection_flow_control() {
        let mut flow = ConnectionFlowControl::new();
        assert_eq!(flow.send_capacity(), 65535);

        flow.send_window_mut().consume(65535);
        assert_eq!(flow.send_capacity(), 0);

        flow.send_window_mut().increase(1000).unwrap();
        assert_eq!(flow.send_capacity(), 1000);
    }
}
