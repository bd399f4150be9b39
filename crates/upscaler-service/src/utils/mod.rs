pub mod futures;
pub mod natsort;
