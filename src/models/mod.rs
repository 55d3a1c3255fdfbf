//! Data models: notification wire frames, payment records, and the REST
//! request/response shapes of the auth endpoints.

mod frame;
mod payment;
mod session;

pub use frame::{ClientFrame, ServerFrame};
pub use payment::{
    PaymentMethod, PaymentPhase, PaymentRecord, PaymentState, PaymentUrlEvent, ProcessResponse,
};
pub use session::{
    AuthIdentity, Credentials, LoginResponse, Session, UserRecord, TWO_FACTOR_REQUIRED,
};
