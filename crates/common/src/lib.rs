//! Shared plumbing for the CRUD workspace: logging setup and small wire types
//! used by more than one crate.

pub mod types;
pub mod utils;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn health_reports_registered_models() {
        let h = types::Health::ok(vec!["article".into(), "tag".into()]);
        assert_eq!(h.status, "ok");
        assert_eq!(h.models.len(), 2);
    }
}
