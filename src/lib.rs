pub mod cli;
pub mod config;
pub mod health;
pub mod lifecycle;
pub mod output;
pub mod paths;
pub mod poll;
pub mod scanner;
pub mod serve;
pub mod sockets;
pub mod sys;
