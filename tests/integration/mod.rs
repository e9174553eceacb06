//! Integration tests for the Street Trees persistence stack

mod test_utils;

mod reset_store;
mod save_propagation;
mod stack_lifecycle;
