//! Librarian library scanner
//!
//! Schedules full scans of configured media libraries, tests every discovered
//! file on a pool of workers and hands accepted files to the task queue.

pub mod cli;
pub mod config;
pub mod services;
