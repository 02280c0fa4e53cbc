//! Email adapters.

mod resend_sink;

pub use resend_sink::ResendEmailSink;
