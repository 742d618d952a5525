//! Integration tests: the engine end to end against an in-memory exchange.

mod mock_exchange;
mod pipeline;
