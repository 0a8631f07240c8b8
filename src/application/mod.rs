pub mod bootstrap;
pub mod breaks;
pub mod controller;
pub mod gateway;
pub mod host;
pub mod ledger;
pub mod recovery;
pub mod session_clock;
pub mod tasks;
