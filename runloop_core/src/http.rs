/// The HTTP client seam. The runloop drives a two-phase resource: a
/// connection while the handshake is in flight, then a session for the
/// body transfer. Implementations must never block inside a step; each
/// call does a bounded amount of work and reports whether its phase
/// concluded.
pub trait HttpTransport: Send {
    fn connect(&self, url: &str) -> Option<Box<dyn HttpConnection>>;
}

pub trait HttpConnection: Send {
    /// One handshake step. Returns true once the handshake has
    /// concluded, successfully or not; `done` tells which.
    fn iterate(&mut self) -> bool;
    fn done(&self) -> bool;
    fn open_session(&mut self) -> Option<Box<dyn HttpSession>>;
}

pub trait HttpSession: Send {
    /// One transport step. Writes progress into `pos`/`total` and
    /// returns true once the transfer has concluded.
    fn update(&mut self, pos: &mut usize, total: &mut usize) -> bool;
    /// The received body, or None when the transfer failed.
    fn take_body(&mut self) -> Option<Vec<u8>>;
}
