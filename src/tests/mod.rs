//! End-to-end tests driving the HTTP surface against a wiremock upstream.
