//! Semantic validation of catalog documents.
//!
//! Serde already rejects unknown fields and bad enum values; the rules here
//! cover everything the schema cannot express.

use std::collections::HashSet;
use std::path::Path;

use regex::Regex;

use crate::model::{
    CatalogDocument, Capability, CheckType, DiskRequirement, OutputParser, PrivilegeLevel, anchored,
};
use crate::template::CommandTemplate;
use crate::{CatalogError, Result};

/// Validate a whole document. Fails on the first violation.
pub fn validate_document(doc: &CatalogDocument) -> Result<()> {
    let mut seen = HashSet::new();
    for capability in &doc.capabilities {
        if !seen.insert(capability.id.as_str()) {
            return Err(CatalogError::DuplicateId(capability.id.clone()));
        }
        validate_capability(capability)?;
    }
    Ok(())
}

/// Validate a single capability.
pub fn validate_capability(cap: &Capability) -> Result<()> {
    if cap.id.trim().is_empty() {
        return Err(CatalogError::invalid("<unnamed>", "id must not be empty"));
    }
    if cap.title.trim().is_empty() {
        return Err(CatalogError::invalid(&cap.id, "title must not be empty"));
    }
    if cap.group.trim().is_empty() {
        return Err(CatalogError::invalid(&cap.id, "group must not be empty"));
    }
    if cap.timeout_secs == 0 {
        return Err(CatalogError::invalid(&cap.id, "timeout_secs must be greater than zero"));
    }

    let template = CommandTemplate::parse(&cap.command)
        .map_err(|e| CatalogError::invalid(&cap.id, e.to_string()))?;

    if !template.program().is_literal() {
        return Err(CatalogError::invalid(
            &cap.id,
            "the program word may not contain placeholders",
        ));
    }

    let mut declared = HashSet::new();
    for arg in &cap.arguments {
        if !declared.insert(arg.as_str()) {
            return Err(CatalogError::invalid(
                &cap.id,
                format!("argument '{arg}' is declared twice"),
            ));
        }
    }
    for name in template.placeholders() {
        if !declared.contains(name.as_str()) {
            return Err(CatalogError::invalid(
                &cap.id,
                format!("placeholder '{{{name}}}' has no declared argument"),
            ));
        }
    }

    for arg in &cap.arguments {
        let Some(pattern) = cap.argument_patterns.get(arg) else {
            return Err(CatalogError::invalid(
                &cap.id,
                format!("argument '{arg}' has no entry in argument_patterns"),
            ));
        };
        anchored(pattern).map_err(|e| {
            CatalogError::invalid(&cap.id, format!("invalid pattern for '{arg}': {e}"))
        })?;
    }
    if let Some(stray) = cap
        .argument_patterns
        .keys()
        .find(|name| !declared.contains(name.as_str()))
    {
        return Err(CatalogError::invalid(
            &cap.id,
            format!("argument_patterns names undeclared argument '{stray}'"),
        ));
    }

    if cap.privilege == PrivilegeLevel::Elevated {
        let program = template.program().render(|_| None).unwrap_or_default();
        if !Path::new(&program).is_absolute() {
            return Err(CatalogError::invalid(
                &cap.id,
                "elevated capabilities must name their program by absolute path",
            ));
        }
    }

    match (cap.output_parser, &cap.output_pattern) {
        (OutputParser::Regex, None) => {
            return Err(CatalogError::invalid(
                &cap.id,
                "the regex output parser requires output_pattern",
            ));
        }
        (_, Some(pattern)) => {
            Regex::new(pattern).map_err(|e| {
                CatalogError::invalid(&cap.id, format!("invalid output_pattern: {e}"))
            })?;
        }
        _ => {}
    }

    for check in &cap.preflight {
        if check.check_type.requires_target() && check.target.trim().is_empty() {
            return Err(CatalogError::invalid(
                &cap.id,
                format!("{:?} check requires a target", check.check_type),
            ));
        }
        if check.check_type == CheckType::DiskSpaceAvailable {
            DiskRequirement::parse(&check.target)
                .map_err(|e| CatalogError::invalid(&cap.id, e.to_string()))?;
        }
    }

    Ok(())
}
