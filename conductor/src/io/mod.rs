//! I/O collaborators for conductor commands.

pub mod action_store;
pub mod config;
pub mod goal_store;
pub mod inbox;
pub mod init;
pub mod os;
pub mod proc_table;
pub mod process;
pub mod reactor;
pub mod records;
pub mod session;
pub mod signals;
pub mod work_queue;
pub mod workers;
