//! Property-based tests for change tracking and notification filtering

mod delta_filter;
