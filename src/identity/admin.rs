use std::collections::HashSet;

use super::profile::Role;

/// E-mail addresses that are granted the admin role. This is the only place
/// role promotion by e-mail is decided.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AdminAllowList {
    emails: HashSet<String>,
}

impl AdminAllowList {
    pub fn new<I, S>(emails: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let emails = emails
            .into_iter()
            .map(|e| e.as_ref().trim().to_lowercase())
            .filter(|e| !e.is_empty())
            .collect();
        Self { emails }
    }

    /// Comma separated list, as found in `PORTAL_ADMIN_EMAILS`.
    pub fn parse(list: &str) -> Self {
        Self::new(list.split(','))
    }

    pub fn contains(&self, email: &str) -> bool {
        self.emails.contains(&email.trim().to_lowercase())
    }

    /// Role a newly created profile gets for `email`.
    pub fn role_for(&self, email: &str) -> Role {
        if self.contains(email) { Role::Admin } else { Role::Client }
    }

    pub fn len(&self) -> usize { self.emails.len() }

    pub fn is_empty(&self) -> bool { self.emails.is_empty() }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_trims_and_lowercases() {
        let list = AdminAllowList::parse(" Boss@Agency.test, ,ops@agency.test ");
        assert_eq!(list.len(), 2);
        assert!(list.contains("boss@agency.test"));
        assert_eq!(list.role_for("OPS@agency.test"), Role::Admin);
        assert_eq!(list.role_for("client@shop.test"), Role::Client);
    }

    #[test]
    fn empty_list_grants_nothing() {
        let list = AdminAllowList::parse("");
        assert!(list.is_empty());
        assert_eq!(list.role_for(""), Role::Client);
    }
}
