//! End-to-end tests for the service fabric live under `tests/`.
