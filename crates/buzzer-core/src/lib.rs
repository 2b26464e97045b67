// Library root: the buzzer round state machine and the JSON wire protocol
// spoken between the server and its browser clients.

pub mod protocol;
pub mod session;
