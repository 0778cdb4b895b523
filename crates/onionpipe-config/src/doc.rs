//! JSON document forms of endpoints and forwards
//!
//! Used for forwards stored in files rather than given as expressions.

use crate::endpoint::{is_onion_host, Endpoint};
use crate::error::{ConfigError, Result};
use crate::forward::Forward;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// JSON representation of an endpoint
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EndpointDoc {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub host: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub ports: Vec<u16>,
    #[serde(default, rename = "unix", skip_serializing_if = "Option::is_none")]
    pub path: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alias: Option<String>,
}

impl EndpointDoc {
    /// Validated and resolved endpoint from this document
    pub fn endpoint(&self, dest: bool, as_onion: bool) -> Result<Endpoint> {
        if self.alias.is_some() && !dest {
            return Err(ConfigError::AliasNotAllowed);
        }
        let mut endpoint = Endpoint {
            host: self.host.clone(),
            ports: self.ports.clone(),
            path: self.path.clone(),
            alias: self.alias.clone(),
            dest,
            ..Default::default()
        };
        endpoint.resolve(as_onion)?;
        Ok(endpoint)
    }
}

/// JSON representation of a forward
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ForwardDoc {
    pub src: EndpointDoc,
    pub dest: EndpointDoc,
}

impl ForwardDoc {
    /// Validated and resolved forward from this document
    pub fn forward(&self) -> Result<Forward> {
        let src_onion = is_onion_host(&self.src.host);
        let src = self
            .src
            .endpoint(false, src_onion)
            .map_err(ConfigError::source_side)?;
        let dest = self
            .dest
            .endpoint(true, !src_onion)
            .map_err(ConfigError::destination_side)?;
        Forward::new(src, dest)
    }

    /// Parse a JSON array of forward documents
    pub fn parse_list(json: &str) -> std::result::Result<Vec<ForwardDoc>, serde_json::Error> {
        serde_json::from_str(json)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_export_doc() {
        let doc = ForwardDoc {
            src: EndpointDoc {
                host: "127.0.0.1".to_string(),
                ports: vec![8080],
                ..Default::default()
            },
            dest: EndpointDoc {
                ports: vec![80],
                alias: Some("blog".to_string()),
                ..Default::default()
            },
        };
        let fwd = doc.forward().unwrap();
        assert!(!fwd.is_import());
        assert_eq!(fwd.source().single_addr().unwrap(), "127.0.0.1:8080");
        assert_eq!(fwd.destination().alias(), Some("blog"));
    }

    #[test]
    fn test_import_doc_from_json() {
        let docs = ForwardDoc::parse_list(
            r#"[{"src": {"host": "xxx.onion", "ports": [80]}, "dest": {"ports": [8000]}}]"#,
        )
        .unwrap();
        assert_eq!(docs.len(), 1);

        let fwd = docs[0].forward().unwrap();
        assert!(fwd.is_import());
        assert_eq!(fwd.destination().single_addr().unwrap(), "127.0.0.1:8000");
    }

    #[test]
    fn test_doc_defaults_onion_port() {
        let doc = ForwardDoc {
            src: EndpointDoc {
                ports: vec![3000],
                ..Default::default()
            },
            dest: EndpointDoc::default(),
        };
        let fwd = doc.forward().unwrap();
        assert_eq!(fwd.destination().ports(), &[80]);
    }

    #[test]
    fn test_doc_rejects_source_alias() {
        let doc = ForwardDoc {
            src: EndpointDoc {
                ports: vec![3000],
                alias: Some("nope".to_string()),
                ..Default::default()
            },
            dest: EndpointDoc::default(),
        };
        assert_eq!(
            doc.forward().unwrap_err().to_string(),
            "forward source: only remote onions can be aliased"
        );
    }

    #[test]
    fn test_doc_round_trips_unix_field_name() {
        let doc = EndpointDoc {
            path: Some(PathBuf::from("/run/app.sock")),
            ..Default::default()
        };
        let json = serde_json::to_string(&doc).unwrap();
        assert_eq!(json, r#"{"unix":"/run/app.sock"}"#);
    }

    #[test]
    fn test_doc_rejects_port_zero() {
        let docs =
            ForwardDoc::parse_list(r#"[{"src": {"ports": [0]}, "dest": {"ports": [0]}}]"#).unwrap();
        assert_eq!(
            docs[0].forward().unwrap_err().to_string(),
            r#"forward source: invalid port "0""#
        );

        let docs =
            ForwardDoc::parse_list(r#"[{"src": {"ports": [3000]}, "dest": {"ports": [80, 0]}}]"#)
                .unwrap();
        assert_eq!(
            docs[0].forward().unwrap_err().to_string(),
            r#"forward destination: invalid port "0""#
        );
    }

    #[test]
    fn test_doc_unix_with_tcp_fields_is_ambiguous() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("app.sock");
        let _listener = std::os::unix::net::UnixListener::bind(&path).unwrap();

        let doc = EndpointDoc {
            host: "127.0.0.1".to_string(),
            ports: vec![8080],
            path: Some(path.clone()),
            ..Default::default()
        };
        assert!(matches!(
            doc.endpoint(false, false),
            Err(ConfigError::AmbiguousEndpoint)
        ));

        let doc = EndpointDoc {
            path: Some(path),
            ..Default::default()
        };
        assert!(matches!(
            doc.endpoint(true, true),
            Err(ConfigError::InvalidOnionEndpoint)
        ));
    }
}
