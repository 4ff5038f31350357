//! Provider version compatibility.
//!
//! Compares the provider versions a management plane exposes against the
//! versions or constraints a template requires. Every problem found is
//! reported, grouped into missing, unsatisfied and unparsable entries.

use semver::{Version, VersionReq};
use thiserror::Error;

use crate::api::templates::{ProviderTuple, Providers};

const OPERATOR_CHARS: &str = "<>=~^!";

/// All incompatibilities found in one comparison.
#[derive(Error, Debug, Default, Clone, PartialEq)]
#[error("{}", self.summary())]
pub struct CompatibilityError {
    pub missing: Vec<String>,
    pub unsatisfied: Vec<String>,
    pub parsing: Vec<String>,
}

impl CompatibilityError {
    pub fn is_empty(&self) -> bool {
        self.missing.is_empty() && self.unsatisfied.is_empty() && self.parsing.is_empty()
    }

    fn extend(&mut self, other: CompatibilityError) {
        self.missing.extend(other.missing);
        self.unsatisfied.extend(other.unsatisfied);
        self.parsing.extend(other.parsing);
    }

    fn normalize(&mut self) {
        for set in [&mut self.missing, &mut self.unsatisfied, &mut self.parsing] {
            set.sort();
            set.dedup();
        }
    }

    fn into_result(mut self) -> Result<(), CompatibilityError> {
        self.normalize();
        match self.is_empty() {
            true => Ok(()),
            false => Err(self),
        }
    }
}

impl CompatibilityError {
    fn summary(&self) -> String {
        let mut parts = vec![];
        if !self.missing.is_empty() {
            parts.push(format!(
                "one or more required providers are not deployed yet: {}",
                self.missing.join(", ")
            ));
        }
        if !self.unsatisfied.is_empty() {
            parts.push(format!(
                "one or more required providers does not satisfy constraints: {}",
                self.unsatisfied.join(", ")
            ));
        }
        if !self.parsing.is_empty() {
            parts.push(format!(
                "failed to parse provider versions: {}",
                self.parsing.join(", ")
            ));
        }
        parts.join("; ")
    }
}

/// Checks `required` entries against the `exposed` ones sharing their name.
pub fn resolve(exposed: &[ProviderTuple], required: &[ProviderTuple]) -> Result<(), CompatibilityError> {
    let mut errors = CompatibilityError::default();

    for requirement in required {
        let Some(provider) = exposed.iter().find(|p| p.name == requirement.name) else {
            errors.missing.push(requirement.name.clone());
            continue;
        };

        let version = provider.version_or_constraint.trim();
        let constraint = requirement.version_or_constraint.trim();
        if version.is_empty() || constraint.is_empty() {
            continue;
        }

        let parsed_version = parse_version(version)
            .map_err(|e| {
                errors.parsing.push(format!(
                    "version {version} of provider {}: {e}",
                    provider.name
                ))
            })
            .ok();
        let parsed_constraint = Constraint::parse(constraint)
            .map_err(|e| {
                errors.parsing.push(format!(
                    "constraint {constraint} of provider {}: {e}",
                    requirement.name
                ))
            })
            .ok();

        if let (Some(version_parsed), Some(constraint_parsed)) = (parsed_version, parsed_constraint) {
            if !constraint_parsed.matches(&version_parsed) {
                errors
                    .unsatisfied
                    .push(format!("{} {version} !~ {constraint}", requirement.name));
            }
        }
    }

    errors.into_result()
}

/// Runs [`resolve`] for each provider category and merges the findings.
pub fn check(exposed: &Providers, required: &Providers) -> Result<(), CompatibilityError> {
    let mut errors = CompatibilityError::default();
    for (exposed, required) in [
        (&exposed.infrastructure, &required.infrastructure),
        (&exposed.bootstrap, &required.bootstrap),
        (&exposed.control_plane, &required.control_plane),
    ] {
        if let Err(e) = resolve(exposed, required) {
            errors.extend(e);
        }
    }
    errors.into_result()
}

pub fn parse_version(raw: &str) -> Result<Version, semver::Error> {
    let raw = raw.trim();
    let raw = raw.strip_prefix('v').unwrap_or(raw);
    Version::parse(raw).or_else(|e| {
        let parts: Vec<&str> = raw.split('.').collect();
        let numeric = parts.iter().all(|p| !p.is_empty() && p.chars().all(|c| c.is_ascii_digit()));
        match (numeric, parts.len()) {
            (true, 1) => Version::parse(&format!("{raw}.0.0")),
            (true, 2) => Version::parse(&format!("{raw}.0")),
            _ => Err(e),
        }
    })
}

/// A constraint expression: alternatives separated by `||`, each a set of
/// comparators that must all hold.
#[derive(Debug, Clone)]
pub struct Constraint {
    alternatives: Vec<VersionReq>,
}

impl Constraint {
    pub fn parse(raw: &str) -> Result<Self, semver::Error> {
        let alternatives = raw
            .split("||")
            .map(|group| VersionReq::parse(&normalize_group(group)))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { alternatives })
    }

    pub fn matches(&self, version: &Version) -> bool {
        self.alternatives.iter().any(|req| req.matches(version))
    }
}

/// Rewrites a comparator group into the comma separated form `semver`
/// understands: `~>` becomes `~`, detached operators are glued to their
/// version and a bare version means an exact match.
fn normalize_group(group: &str) -> String {
    let group = group.replace("~>", "~");
    let mut comparators = vec![];
    let mut pending = String::new();

    for token in group
        .split(|c: char| c == ',' || c.is_whitespace())
        .filter(|t| !t.is_empty())
    {
        if token.chars().all(|c| OPERATOR_CHARS.contains(c)) {
            pending.push_str(token);
            continue;
        }

        let split = token
            .find(|c: char| !OPERATOR_CHARS.contains(c))
            .unwrap_or(token.len());
        let (op, version) = token.split_at(split);
        let op = format!("{pending}{op}");
        pending.clear();

        let version = version.strip_prefix('v').unwrap_or(version);
        let wildcard = version == "*" || version.split('.').any(|p| p == "x" || p == "X" || p == "*");
        let version = match wildcard {
            true => version.replace(['x', 'X'], "*"),
            false => version.to_string(),
        };
        let op = match (op.is_empty(), wildcard) {
            (true, false) => "=".to_string(),
            _ => op,
        };
        comparators.push(format!("{op}{version}"));
    }

    comparators.join(", ")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tuple(name: &str, version: &str) -> ProviderTuple {
        ProviderTuple {
            name: name.to_string(),
            version_or_constraint: version.to_string(),
        }
    }

    #[test]
    fn satisfied_pessimistic_constraint() {
        assert_eq!(
            resolve(&[tuple("aws", "1.2.3")], &[tuple("aws", "~>1.2.0")]),
            Ok(())
        );
    }

    #[test]
    fn unsatisfied_constraint_renders_both_values() {
        let err = resolve(&[tuple("aws", "0.9.0")], &[tuple("aws", "~>1.2.0")]).unwrap_err();
        assert_eq!(err.unsatisfied, vec!["aws 0.9.0 !~ ~>1.2.0".to_string()]);
        assert!(err.to_string().contains("aws 0.9.0 !~ ~>1.2.0"));
    }

    #[test]
    fn missing_provider_is_reported() {
        let err = resolve(&[], &[tuple("aws", "~>1.2.0")]).unwrap_err();
        assert_eq!(err.missing, vec!["aws".to_string()]);
        assert!(err.to_string().contains("aws"));
    }

    #[test]
    fn message_lists_every_category() {
        let err = resolve(
            &[tuple("aws", "0.9.0"), tuple("azure", "latest")],
            &[
                tuple("aws", "~>1.2.0"),
                tuple("azure", ">=1.0.0"),
                tuple("gcp", ""),
            ],
        )
        .unwrap_err();

        let message = err.to_string();
        let categories: Vec<_> = message.split("; ").collect();
        assert_eq!(categories.len(), 3, "{message}");
        assert_eq!(
            categories[0],
            "one or more required providers are not deployed yet: gcp"
        );
        assert_eq!(
            categories[1],
            "one or more required providers does not satisfy constraints: aws 0.9.0 !~ ~>1.2.0"
        );
        assert!(
            categories[2].starts_with("failed to parse provider versions: version latest of provider azure"),
            "{message}"
        );
        let _: &dyn std::error::Error = &err;
    }

    #[test]
    fn empty_version_or_constraint_only_checks_presence() {
        assert_eq!(
            resolve(&[tuple("aws", "")], &[tuple("aws", "~>1.2.0")]),
            Ok(())
        );
        assert_eq!(resolve(&[tuple("aws", "1.0.0")], &[tuple("aws", "")]), Ok(()));
    }

    #[test]
    fn all_categories_accumulate() {
        let exposed = [
            tuple("aws", "0.9.0"),
            tuple("azure", "not-a-version"),
            tuple("vsphere", "1.0.0"),
        ];
        let required = [
            tuple("k0smotron", ""),
            tuple("aws", ">=1.0.0"),
            tuple("azure", "1.0.0"),
            tuple("vsphere", "~> bogus"),
            tuple("openstack", "1.0.0"),
        ];
        let err = resolve(&exposed, &required).unwrap_err();

        assert_eq!(err.missing, vec!["k0smotron", "openstack"]);
        assert_eq!(err.unsatisfied, vec!["aws 0.9.0 !~ >=1.0.0"]);
        assert_eq!(err.parsing.len(), 2);
        assert!(err.parsing[0].starts_with("constraint ~> bogus of provider vsphere"));
        assert!(err.parsing[1].starts_with("version not-a-version of provider azure"));
    }

    #[test]
    fn input_order_does_not_change_findings() {
        let exposed = vec![tuple("aws", "0.1.0"), tuple("azure", "2.0.0")];
        let required = vec![
            tuple("vsphere", ""),
            tuple("aws", "^1.0"),
            tuple("azure", "<2.0.0"),
            tuple("openstack", ""),
        ];
        let forward = resolve(&exposed, &required).unwrap_err();

        let mut exposed_rev = exposed.clone();
        exposed_rev.reverse();
        let mut required_rev = required.clone();
        required_rev.reverse();
        let backward = resolve(&exposed_rev, &required_rev).unwrap_err();

        assert_eq!(forward, backward);
        assert_eq!(forward.missing, vec!["openstack", "vsphere"]);
    }

    #[test]
    fn constraint_dialect() {
        let version = parse_version("v1.2.3").unwrap();
        for satisfied in ["~> 1.2", ">= 1.0 < 2.0", ">=1.0, <2.0", "1.2.3", "1.2.x", "<1.0 || >=1.2"] {
            assert!(
                Constraint::parse(satisfied).unwrap().matches(&version),
                "{satisfied} should match"
            );
        }
        for unsatisfied in ["~>1.3.0", "1.2.4", ">2 || <1"] {
            assert!(
                !Constraint::parse(unsatisfied).unwrap().matches(&version),
                "{unsatisfied} should not match"
            );
        }
    }

    #[test]
    fn short_versions_are_padded() {
        assert_eq!(parse_version("1.2").unwrap(), Version::new(1, 2, 0));
        assert_eq!(parse_version("2").unwrap(), Version::new(2, 0, 0));
        assert!(parse_version("1.2.beta").is_err());
    }

    #[test]
    fn check_merges_categories() {
        let exposed = Providers {
            infrastructure: vec![tuple("aws", "1.2.3")],
            bootstrap: vec![],
            control_plane: vec![tuple("k0smotron", "0.9.0")],
        };
        let required = Providers {
            infrastructure: vec![tuple("aws", "~>1.2.0")],
            bootstrap: vec![tuple("k0smotron", "")],
            control_plane: vec![tuple("k0smotron", ">=1.0.0")],
        };
        let err = check(&exposed, &required).unwrap_err();

        assert_eq!(err.missing, vec!["k0smotron"]);
        assert_eq!(err.unsatisfied, vec!["k0smotron 0.9.0 !~ >=1.0.0"]);
        assert!(err.parsing.is_empty());
    }
}
