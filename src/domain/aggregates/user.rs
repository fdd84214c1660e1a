//! Users, as vouched for by the API gateway in front of us.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use crate::domain::value_objects::CountryCode;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct User {
    pub id: Uuid,
    pub username: String,
    pub email: String,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    /// Country from the user's profile; one input to tax and block checks.
    pub country_code: Option<CountryCode>,
    pub is_staff: bool,
    pub created_at: DateTime<Utc>,
}

/// Claims decoded from the gateway's user-info header.
#[derive(Clone, Debug, Deserialize)]
pub struct UserInfo {
    pub preferred_username: String,
    pub email: String,
    pub given_name: Option<String>,
    pub family_name: Option<String>,
    pub country_code: Option<String>,
    #[serde(default)]
    pub is_staff: bool,
}

impl User {
    pub fn from_userinfo(info: &UserInfo) -> Self {
        Self {
            id: Uuid::now_v7(),
            username: info.preferred_username.clone(),
            email: info.email.clone(),
            first_name: info.given_name.clone(),
            last_name: info.family_name.clone(),
            country_code: info.country_code.as_deref().and_then(|c| CountryCode::new(c).ok()),
            is_staff: info.is_staff,
            created_at: Utc::now(),
        }
    }

    /// Refresh profile data from newer claims. Returns true when anything changed.
    pub fn refresh(&mut self, info: &UserInfo) -> bool {
        let country = info.country_code.as_deref().and_then(|c| CountryCode::new(c).ok());
        let changed = self.username != info.preferred_username
            || self.first_name != info.given_name
            || self.last_name != info.family_name
            || (country.is_some() && self.country_code != country)
            || self.is_staff != info.is_staff;
        self.username = info.preferred_username.clone();
        self.first_name = info.given_name.clone();
        self.last_name = info.family_name.clone();
        if country.is_some() { self.country_code = country; }
        self.is_staff = info.is_staff;
        changed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    #[test]
    fn test_from_userinfo_ignores_bad_country() {
        let info = UserInfo {
            preferred_username: "learner".into(), email: "learner@example.com".into(), given_name: None,
            family_name: None, country_code: Some("Narnia".into()), is_staff: false,
        };
        let user = User::from_userinfo(&info);
        assert_eq!(user.username, "learner");
        assert!(user.country_code.is_none());
    }
}
