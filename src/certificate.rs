pub mod issuer;
pub mod trigger;

pub use issuer::{Certificate, CertificateIssuer, IssueOutcome, SqliteCertificateIssuer};
pub use trigger::{CertificationTrigger, course_grade};
