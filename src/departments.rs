use crate::error::{PipelineError, Result};

pub const PLACEHOLDER: &str = "{dept}";

/// Metropolitan department codes in selector order: `01`..`95` with Corsica's
/// `2A`/`2B` standing where `20` would be.
pub fn department_codes() -> Vec<String> {
    let mut codes: Vec<String> = (1..=95).filter(|i| *i != 20).map(|i| format!("{:02}", i)).collect();
    codes.insert(19, "2A".to_string());
    codes.insert(20, "2B".to_string());
    codes
}

/// Canonical form of a user-supplied code (`1` -> `01`, `2a` -> `2A`).
pub fn canonical_department(code: &str) -> Result<String> {
    let code = code.trim().to_ascii_uppercase();
    let candidate = match code.parse::<u32>() {
        Ok(n) => format!("{:02}", n),
        Err(_) => code,
    };
    if department_codes().contains(&candidate) {
        Ok(candidate)
    } else {
        Err(PipelineError::UnknownDepartment(candidate))
    }
}

/// Fills the `{dept}` slot of a path template.
pub fn department_path(template: &str, code: &str) -> Result<String> {
    let code = canonical_department(code)?;
    Ok(template.replace(PLACEHOLDER, &code))
}

/// Resolves a dataset path. Templates with a `{dept}` slot need a department,
/// templates without one (regional layers) must not get one.
pub fn resolve_path(template: &str, department: Option<&str>) -> Result<String> {
    match (template.contains(PLACEHOLDER), department) {
        (true, Some(code)) => department_path(template, code),
        (false, None) => Ok(template.to_string()),
        (true, None) => Err(PipelineError::DepartmentScope {
            path: template.to_string(),
            reason: "a department code is required",
        }),
        (false, Some(_)) => Err(PipelineError::DepartmentScope {
            path: template.to_string(),
            reason: "the layer is not split by department",
        }),
    }
}
