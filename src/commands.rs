pub mod convert;
pub mod init;
pub mod serve;
