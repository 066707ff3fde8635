//! One-shot capability probing for the request primitive.
//!
//! Runs once when the host is composed: try the preferred factory, fall back
//! to a legacy same-origin-only factory best-effort, and record immutable
//! capability flags that everything downstream reads.

use std::rc::Rc;

use tracing::{debug, info, warn};

use crate::backend::BackendFactory;
use crate::error::ProbeError;

/// What the selected backend can do. Read-only after probing; shared by all
/// transports of one host.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Capabilities {
    /// Whether binary payloads are carried natively.
    pub binary: bool,
    /// Whether requests may target foreign origins at all. When false, a
    /// cross-domain transport is not viable and the negotiation layer should
    /// pick another transport.
    pub cross_origin: bool,
}

/// Select the backend factory and determine its capabilities.
///
/// # Errors
///
/// Returns [`ProbeError`] when neither factory can construct a handle.
pub fn probe(
    preferred: Rc<dyn BackendFactory>,
    legacy: Option<Rc<dyn BackendFactory>>,
) -> Result<(Rc<dyn BackendFactory>, Capabilities), ProbeError> {
    match preferred.create() {
        Ok(handle) => {
            drop(handle);
            let capabilities = Capabilities {
                binary: preferred.supports_binary(),
                cross_origin: preferred.supports_cross_origin(),
            };
            info!(
                binary = capabilities.binary,
                cross_origin = capabilities.cross_origin,
                "request backend probed"
            );
            Ok((preferred, capabilities))
        }
        Err(preferred_error) => {
            warn!(error = %preferred_error, "preferred request backend unavailable");
            if let Some(legacy) = legacy {
                match legacy.create() {
                    Ok(handle) => {
                        drop(handle);
                        info!("legacy request backend selected; same-origin only");
                        return Ok((
                            legacy,
                            Capabilities {
                                binary: false,
                                cross_origin: false,
                            },
                        ));
                    }
                    Err(error) => {
                        debug!(error = %error, "legacy request backend unavailable");
                    }
                }
            }
            Err(ProbeError::new(preferred_error))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::mock::MockFactory;

    #[test]
    fn preferred_backend_wins_with_its_flags() {
        let preferred = Rc::new(MockFactory::new());
        let (_, capabilities) =
            probe(Rc::clone(&preferred) as Rc<dyn BackendFactory>, None).expect("probe");

        assert!(capabilities.binary);
        assert!(capabilities.cross_origin);
        assert_eq!(preferred.created(), 1);
    }

    #[test]
    fn legacy_fallback_is_same_origin_textual() {
        let preferred = Rc::new(MockFactory::new());
        preferred.refuse_creation();
        let legacy = Rc::new(MockFactory::new());

        let (_, capabilities) = probe(
            preferred as Rc<dyn BackendFactory>,
            Some(Rc::clone(&legacy) as Rc<dyn BackendFactory>),
        )
        .expect("probe");

        assert!(!capabilities.binary);
        assert!(!capabilities.cross_origin);
        assert_eq!(legacy.created(), 1);
    }

    #[test]
    fn both_unavailable_is_an_error() {
        let preferred = Rc::new(MockFactory::new());
        preferred.refuse_creation();
        let legacy = Rc::new(MockFactory::new());
        legacy.refuse_creation();

        let result = probe(
            preferred as Rc<dyn BackendFactory>,
            Some(legacy as Rc<dyn BackendFactory>),
        );
        assert!(result.is_err());
    }
}
