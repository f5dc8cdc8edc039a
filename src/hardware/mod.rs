pub mod relay;
pub mod uart;
