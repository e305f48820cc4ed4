//! Routing table: ordered (sequence-name pattern, classifier) pairs.
//!
//! Order is the conflict-resolution rule. For every (subject, session)
//! partition the driver walks the table top to bottom, and a record claimed
//! by an earlier entry is never offered to a later one.

use std::fmt;
use std::path::Path;

use regex::Regex;
use serde::Deserialize;
use tracing::debug;

use crate::classify::classifiers::{
    classify_bold, classify_diffusion, classify_discard, classify_ep2d_se, classify_fieldmap,
    classify_gre, classify_mprage, classify_tse, classify_tse_vfl, ClassifierFn,
};
use crate::errors::{NiixError, NiixResult};

/// Every classifier a routing entry may name.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ClassifierKind {
    Mprage,
    TseVfl,
    Diffusion,
    Bold,
    Fieldmap,
    Gre,
    Tse,
    Ep2dSe,
    Discard,
}

impl ClassifierKind {
    pub const ALL: [ClassifierKind; 9] = [
        ClassifierKind::Mprage,
        ClassifierKind::TseVfl,
        ClassifierKind::Diffusion,
        ClassifierKind::Bold,
        ClassifierKind::Fieldmap,
        ClassifierKind::Gre,
        ClassifierKind::Tse,
        ClassifierKind::Ep2dSe,
        ClassifierKind::Discard,
    ];

    pub fn name(self) -> &'static str {
        match self {
            ClassifierKind::Mprage => "mprage",
            ClassifierKind::TseVfl => "tse_vfl",
            ClassifierKind::Diffusion => "diffusion",
            ClassifierKind::Bold => "bold",
            ClassifierKind::Fieldmap => "fieldmap",
            ClassifierKind::Gre => "gre",
            ClassifierKind::Tse => "tse",
            ClassifierKind::Ep2dSe => "ep2d_se",
            ClassifierKind::Discard => "discard",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.name() == name)
    }

    pub fn classifier(self) -> ClassifierFn {
        match self {
            ClassifierKind::Mprage => classify_mprage,
            ClassifierKind::TseVfl => classify_tse_vfl,
            ClassifierKind::Diffusion => classify_diffusion,
            ClassifierKind::Bold => classify_bold,
            ClassifierKind::Fieldmap => classify_fieldmap,
            ClassifierKind::Gre => classify_gre,
            ClassifierKind::Tse => classify_tse,
            ClassifierKind::Ep2dSe => classify_ep2d_se,
            ClassifierKind::Discard => classify_discard,
        }
    }
}

impl fmt::Display for ClassifierKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// One compiled routing entry.
pub struct Route {
    pub pattern: Regex,
    pub kind: ClassifierKind,
    pub classify: ClassifierFn,
}

impl Route {
    pub fn new(pattern: &str, kind: ClassifierKind) -> NiixResult<Self> {
        Ok(Self {
            pattern: Regex::new(pattern)?,
            kind,
            classify: kind.classifier(),
        })
    }

    pub fn source(&self) -> &str {
        self.pattern.as_str()
    }
}

impl fmt::Debug for Route {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Route")
            .field("pattern", &self.source())
            .field("kind", &self.kind)
            .finish()
    }
}

/// Built-in table for Siemens sequences, in priority order.
const SIEMENS_ROUTES: &[(&str, ClassifierKind)] = &[
    // product sequences
    ("^tfl$", ClassifierKind::Mprage),
    ("^tse_vfl$", ClassifierKind::TseVfl),
    (".*diff.*", ClassifierKind::Diffusion),
    ("(.*bold.*)|(.*pace.*)", ClassifierKind::Bold),
    ("^gre_field_mapping$", ClassifierKind::Fieldmap),
    ("^gre$", ClassifierKind::Gre),
    ("^tse$", ClassifierKind::Tse),
    (".*ep2d_se.*", ClassifierKind::Ep2dSe),
    ("^haste$", ClassifierKind::Discard),
    ("resolve", ClassifierKind::Diffusion),
    ("AALScout", ClassifierKind::Discard),
    // WIP and customer sequences
    (".*mp2rage.*", ClassifierKind::Mprage),
    ("ep2d_stejskal_386", ClassifierKind::Diffusion),
    (".*wip925.*", ClassifierKind::Mprage),
    ("tse_vfl_wipb15", ClassifierKind::TseVfl),
    ("tse_vfl_cs_WIP1061", ClassifierKind::TseVfl),
    ("^icm_gre$", ClassifierKind::Gre),
    ("PtkSmsVB13ADwDualSpinEchoEpi", ClassifierKind::Diffusion),
    ("cubric_tfl_fatnavs", ClassifierKind::Mprage),
    ("dkd_tfl_brp", ClassifierKind::Mprage),
];

#[derive(Deserialize)]
struct RoutingFile {
    #[serde(default)]
    route: Vec<RouteEntry>,
}

#[derive(Deserialize)]
struct RouteEntry {
    pattern: String,
    classifier: String,
}

/// Ordered list of routes; earlier entries win.
#[derive(Debug)]
pub struct RoutingTable {
    routes: Vec<Route>,
}

impl RoutingTable {
    pub fn new(routes: Vec<Route>) -> Self {
        Self { routes }
    }

    pub fn siemens_default() -> Self {
        let routes = SIEMENS_ROUTES
            .iter()
            .map(|&(pattern, kind)| Route::new(pattern, kind).expect("built-in route pattern compiles"))
            .collect();
        Self { routes }
    }

    /// Parse `[[route]]` entries; the file replaces the built-in table entirely.
    pub fn from_toml_str(text: &str) -> NiixResult<Self> {
        let file: RoutingFile = toml::from_str(text)?;
        if file.route.is_empty() {
            return Err(NiixError::Config(
                "routing file declares no [[route]] entry".to_string(),
            ));
        }
        let mut routes = Vec::with_capacity(file.route.len());
        for entry in file.route {
            let kind = ClassifierKind::from_name(&entry.classifier).ok_or_else(|| {
                NiixError::Config(format!(
                    "unknown classifier \"{}\" for pattern \"{}\"",
                    entry.classifier, entry.pattern
                ))
            })?;
            routes.push(Route::new(&entry.pattern, kind)?);
        }
        Ok(Self { routes })
    }

    pub fn load(path: &Path) -> NiixResult<Self> {
        let text = std::fs::read_to_string(path)?;
        let table = Self::from_toml_str(&text)?;
        debug!("Loaded {} routes from {}", table.len(), path.display());
        Ok(table)
    }

    pub fn routes(&self) -> &[Route] {
        &self.routes
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }

    /// First route whose pattern matches `sequence_name` from its start.
    pub fn first_match(&self, sequence_name: &str) -> Option<&Route> {
        self.routes
            .iter()
            .find(|route| crate::classify::predicates::matches_from_start(&route.pattern, sequence_name))
    }
}

impl Default for RoutingTable {
    fn default() -> Self {
        Self::siemens_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_table_compiles_every_route() {
        let table = RoutingTable::siemens_default();
        assert_eq!(table.len(), SIEMENS_ROUTES.len());
        assert_eq!(table.routes()[0].source(), "^tfl$");
        assert_eq!(table.routes()[0].kind, ClassifierKind::Mprage);
    }

    #[test]
    fn test_default_table_priority_contract() {
        let table = RoutingTable::siemens_default();
        let kind_of = |name: &str| table.first_match(name).map(|r| r.kind);

        assert_eq!(kind_of("tfl"), Some(ClassifierKind::Mprage));
        assert_eq!(kind_of("tse_vfl"), Some(ClassifierKind::TseVfl));
        assert_eq!(kind_of("ep2d_diff"), Some(ClassifierKind::Diffusion));
        assert_eq!(kind_of("cmrr_mbep2d_bold"), Some(ClassifierKind::Bold));
        assert_eq!(kind_of("ep2d_pace"), Some(ClassifierKind::Bold));
        assert_eq!(kind_of("gre_field_mapping"), Some(ClassifierKind::Fieldmap));
        assert_eq!(kind_of("gre"), Some(ClassifierKind::Gre));
        assert_eq!(kind_of("tse"), Some(ClassifierKind::Tse));
        assert_eq!(kind_of("ep2d_se"), Some(ClassifierKind::Ep2dSe));
        assert_eq!(kind_of("haste"), Some(ClassifierKind::Discard));
        assert_eq!(kind_of("AALScout"), Some(ClassifierKind::Discard));
        assert_eq!(kind_of("resolve"), Some(ClassifierKind::Diffusion));
        assert_eq!(kind_of("wip_mp2rage"), Some(ClassifierKind::Mprage));
        assert_eq!(kind_of("tse_vfl_wipb15"), Some(ClassifierKind::TseVfl));
        assert_eq!(kind_of("icm_gre"), Some(ClassifierKind::Gre));
        assert_eq!(kind_of("dkd_tfl_brp"), Some(ClassifierKind::Mprage));
        // a diffusion sequence with "bold" in its name goes to diffusion first
        assert_eq!(kind_of("ep2d_diff_bold"), Some(ClassifierKind::Diffusion));
        // anchored product names do not swallow variants
        assert_eq!(kind_of("tfl_custom"), None);
        assert_eq!(kind_of("fl3d"), None);
    }

    #[test]
    fn test_from_toml_keeps_declared_order() {
        let table = RoutingTable::from_toml_str(
            r#"
            [[route]]
            pattern = "^gre$"
            classifier = "gre"

            [[route]]
            pattern = ".*gre.*"
            classifier = "discard"
            "#,
        )
        .unwrap();
        assert_eq!(table.len(), 2);
        assert_eq!(table.first_match("gre").map(|r| r.kind), Some(ClassifierKind::Gre));
        assert_eq!(
            table.first_match("my_gre").map(|r| r.kind),
            Some(ClassifierKind::Discard)
        );
    }

    #[test]
    fn test_from_toml_rejects_unknown_classifier() {
        let err = RoutingTable::from_toml_str(
            "[[route]]\npattern = \"^x$\"\nclassifier = \"spectroscopy\"\n",
        )
        .unwrap_err();
        assert!(matches!(err, NiixError::Config(_)));
        assert!(err.to_string().contains("spectroscopy"));
    }

    #[test]
    fn test_from_toml_rejects_bad_regex_and_empty_file() {
        let err = RoutingTable::from_toml_str("[[route]]\npattern = \"(\"\nclassifier = \"gre\"\n")
            .unwrap_err();
        assert!(matches!(err, NiixError::Regex(_)));

        let err = RoutingTable::from_toml_str("").unwrap_err();
        assert!(matches!(err, NiixError::Config(_)));

        let err = RoutingTable::from_toml_str("route = 3").unwrap_err();
        assert!(matches!(err, NiixError::Toml(_)));
    }

    #[test]
    fn test_classifier_names_round_trip() {
        for kind in ClassifierKind::ALL {
            assert_eq!(ClassifierKind::from_name(kind.name()), Some(kind));
        }
        assert_eq!(ClassifierKind::from_name("MPRAGE"), None);
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("routes.toml");
        std::fs::write(&path, "[[route]]\npattern = \"^tfl$\"\nclassifier = \"mprage\"\n").unwrap();
        let table = RoutingTable::load(&path).unwrap();
        assert_eq!(table.routes()[0].kind, ClassifierKind::Mprage);
        assert!(RoutingTable::load(&dir.path().join("missing.toml")).is_err());
    }
}
