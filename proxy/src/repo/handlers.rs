pub mod publisher;
pub mod session;
pub mod udphandler;
