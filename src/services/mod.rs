pub mod executor_service;
pub mod uart_service;

pub use executor_service::ExecutorService;
pub use uart_service::UartService;
