use crate::tenancy::TenantKey;

/// `sheet-{zeroBasedIndex}`, bit-exact per the blob path scheme.
pub fn sheet_id(index: usize) -> String {
    format!("sheet-{index}")
}

/// Inverse of [`sheet_id`]. Returns `None` if `id` isn't of the form `sheet-N`.
pub fn sheet_index(id: &str) -> Option<usize> {
    id.strip_prefix("sheet-")?.parse().ok()
}

pub fn source_pdf_path(tenant: &TenantKey) -> String {
    format!(
        "organizations/{}/projects/{}/plans/{}/source.pdf",
        tenant.organization_id, tenant.project_id, tenant.plan_id
    )
}

pub fn sheet_png_path(tenant: &TenantKey, sheet_id: &str) -> String {
    format!(
        "organizations/{}/projects/{}/plans/{}/sheets/{}/source.png",
        tenant.organization_id, tenant.project_id, tenant.plan_id, sheet_id
    )
}

pub fn sheet_tiles_path(tenant: &TenantKey, sheet_id: &str) -> String {
    format!(
        "organizations/{}/projects/{}/plans/{}/sheets/{}/tiles.pmtiles",
        tenant.organization_id, tenant.project_id, tenant.plan_id, sheet_id
    )
}

/// Matches `^organizations/([^/]+)/projects/([^/]+)/plans/([^/]+)/source\.pdf$`
/// against an upload-notification object key.
pub fn parse_source_pdf_key(object_key: &str) -> Option<TenantKey> {
    let rest = object_key.strip_prefix("organizations/")?;
    let (org, rest) = rest.split_once("/projects/")?;
    let (project, rest) = rest.split_once("/plans/")?;
    let plan = rest.strip_suffix("/source.pdf")?;

    if org.is_empty() || project.is_empty() || plan.is_empty() {
        return None;
    }
    if org.contains('/') || project.contains('/') || plan.contains('/') {
        return None;
    }

    Some(TenantKey::new(org, project, plan))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sheet_id_roundtrip() {
        assert_eq!(sheet_id(0), "sheet-0");
        assert_eq!(sheet_index("sheet-0"), Some(0));
        assert_eq!(sheet_index("sheet-12"), Some(12));
        assert_eq!(sheet_index("bogus"), None);
    }

    #[test]
    fn blob_paths_are_bit_exact() {
        let tenant = TenantKey::new("O", "P", "L");
        assert_eq!(source_pdf_path(&tenant), "organizations/O/projects/P/plans/L/source.pdf");
        assert_eq!(
            sheet_png_path(&tenant, "sheet-0"),
            "organizations/O/projects/P/plans/L/sheets/sheet-0/source.png"
        );
        assert_eq!(
            sheet_tiles_path(&tenant, "sheet-3"),
            "organizations/O/projects/P/plans/L/sheets/sheet-3/tiles.pmtiles"
        );
    }

    #[test]
    fn parses_matching_upload_key() {
        let tenant = parse_source_pdf_key("organizations/O/projects/P/plans/L/source.pdf").unwrap();
        assert_eq!(tenant, TenantKey::new("O", "P", "L"));
    }

    #[test]
    fn rejects_non_matching_keys() {
        assert!(parse_source_pdf_key("organizations/O/projects/P/plans/L/image.png").is_none());
        assert!(parse_source_pdf_key("organizations/O/plans/L/source.pdf").is_none());
        assert!(parse_source_pdf_key("organizations//projects/P/plans/L/source.pdf").is_none());
    }
}
