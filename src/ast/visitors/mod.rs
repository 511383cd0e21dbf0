//! The standard extraction visitors.

pub mod api_endpoint;
pub mod config_object;
pub mod credential;
pub mod encoded_string;
pub mod sensitive_function;

pub use api_endpoint::ApiEndpointVisitor;
pub use config_object::ConfigObjectVisitor;
pub use credential::CredentialVisitor;
pub use encoded_string::EncodedStringVisitor;
pub use sensitive_function::SensitiveFunctionVisitor;

use crate::ast::AstVisitor;
use std::sync::Arc;

/// The five standard visitors, in registration order.
pub fn default_visitors() -> Vec<Arc<dyn AstVisitor>> {
    vec![
        Arc::new(CredentialVisitor::new()),
        Arc::new(ApiEndpointVisitor::new()),
        Arc::new(SensitiveFunctionVisitor::new()),
        Arc::new(ConfigObjectVisitor::new()),
        Arc::new(EncodedStringVisitor::new()),
    ]
}
