pub mod signup;
pub mod visit;

pub use signup::{EmailSignup, SignupRequest};
pub use visit::{NewVisit, TrackVisitRequest, VisitRecord};
