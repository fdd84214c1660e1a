//! Tax rates, blocked countries and customer geolocation

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::net::Ipv4Addr;
use uuid::Uuid;
use crate::domain::value_objects::{quantize, CountryCode};

/// Percentage tax collected from customers located in a country.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TaxRate {
    pub id: Uuid,
    pub country_code: CountryCode,
    /// Percent, e.g. `20` for 20%.
    pub tax_rate: Decimal,
    pub tax_rate_name: String,
    pub active: bool,
    pub created_at: DateTime<Utc>,
}

impl TaxRate {
    pub fn new(country_code: CountryCode, tax_rate: Decimal, tax_rate_name: impl Into<String>) -> Self {
        Self { id: Uuid::now_v7(), country_code, tax_rate, tax_rate_name: tax_rate_name.into(), active: true, created_at: Utc::now() }
    }

    pub fn tax_for(&self, amount: Decimal) -> Decimal {
        quantize(amount * self.tax_rate / Decimal::ONE_HUNDRED)
    }
}

/// A country customers can't buy from, for everything or for one product.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct BlockedCountry {
    pub id: Uuid,
    pub country_code: CountryCode,
    pub product_id: Option<Uuid>,
    pub active: bool,
    pub created_at: DateTime<Utc>,
}

impl BlockedCountry {
    pub fn new(country_code: CountryCode, product_id: Option<Uuid>) -> Self {
        Self { id: Uuid::now_v7(), country_code, product_id, active: true, created_at: Utc::now() }
    }
}

/// One row of the GeoIP table: an inclusive IPv4 range and its country.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct NetBlock {
    pub ip_start: Ipv4Addr,
    pub ip_end: Ipv4Addr,
    pub country_code: CountryCode,
}

impl NetBlock {
    pub fn contains(&self, ip: Ipv4Addr) -> bool {
        (u32::from(self.ip_start)..=u32::from(self.ip_end)).contains(&u32::from(ip))
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GeolocationType {
    #[default]
    None,
    Geoip,
    Profile,
}

/// Where we decided the customer is, and how we decided it.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct CustomerLocation {
    pub country_code: Option<CountryCode>,
    pub geolocation_type: GeolocationType,
}

/// Which list of countries we're checking against.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FlagKind { Tax, Blocked }

/// Location metadata a basket carries for tax and block decisions.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct CustomerLocationMetadata {
    pub user_ip: Option<String>,
    pub location_tax: CustomerLocation,
    pub location_block: CustomerLocation,
}

/// Decide where the customer is.
///
/// With `force_profile` the profile country always wins. Otherwise a flagged
/// country (tax or blocked, per the list passed in) wins over an unflagged one,
/// the profile being checked first; with nothing flagged, GeoIP is preferred
/// and the profile is the fallback.
pub fn determine_user_location(
    profile: Option<&CountryCode>,
    geoip: Option<&CountryCode>,
    flagged: &[CountryCode],
    force_profile: bool,
) -> CustomerLocation {
    let located = |code: Option<&CountryCode>, kind| CustomerLocation { country_code: code.cloned(), geolocation_type: kind };
    if force_profile {
        return match profile {
            Some(code) => located(Some(code), GeolocationType::Profile),
            None => CustomerLocation::default(),
        };
    }
    if let Some(code) = profile.filter(|c| flagged.contains(c)) {
        return located(Some(code), GeolocationType::Profile);
    }
    if let Some(code) = geoip.filter(|c| flagged.contains(c)) {
        return located(Some(code), GeolocationType::Geoip);
    }
    match (geoip, profile) {
        (Some(code), _) => located(Some(code), GeolocationType::Geoip),
        (None, Some(code)) => located(Some(code), GeolocationType::Profile),
        (None, None) => CustomerLocation::default(),
    }
}

/// Country codes flagged for `kind`. Blocks scoped to a product only count
/// when that product is the one being checked.
pub fn flagged_countries(kind: FlagKind, product_id: Option<Uuid>, blocks: &[BlockedCountry], rates: &[TaxRate]) -> Vec<CountryCode> {
    let mut codes: Vec<CountryCode> = match kind {
        FlagKind::Blocked => blocks
            .iter()
            .filter(|b| b.active && (b.product_id.is_none() || (product_id.is_some() && b.product_id == product_id)))
            .map(|b| b.country_code.clone())
            .collect(),
        FlagKind::Tax => rates.iter().filter(|r| r.active).map(|r| r.country_code.clone()).collect(),
    };
    codes.sort();
    codes.dedup();
    codes
}

/// Whether the product is blocked for a customer in `country`.
pub fn is_blocked(country: &CountryCode, product_id: Uuid, blocks: &[BlockedCountry]) -> bool {
    flagged_countries(FlagKind::Blocked, Some(product_id), blocks, &[]).contains(country)
}

/// The active tax rate for `country`, if we collect tax there.
pub fn applicable_tax_rate<'a>(country: Option<&CountryCode>, rates: &'a [TaxRate]) -> Option<&'a TaxRate> {
    let country = country?;
    rates.iter().find(|r| r.active && &r.country_code == country)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cc(code: &str) -> CountryCode { CountryCode::new(code).unwrap() }

    #[test]
    fn test_prefers_geoip_when_nothing_flagged() {
        let loc = determine_user_location(Some(&cc("US")), Some(&cc("FR")), &[], false);
        assert_eq!(loc.country_code, Some(cc("FR")));
        assert_eq!(loc.geolocation_type, GeolocationType::Geoip);
    }

    #[test]
    fn test_flagged_profile_wins() {
        let loc = determine_user_location(Some(&cc("IR")), Some(&cc("FR")), &[cc("IR")], false);
        assert_eq!(loc.country_code, Some(cc("IR")));
        assert_eq!(loc.geolocation_type, GeolocationType::Profile);
    }

    #[test]
    fn test_flagged_geoip_wins_over_profile() {
        let loc = determine_user_location(Some(&cc("US")), Some(&cc("CU")), &[cc("CU")], false);
        assert_eq!(loc.country_code, Some(cc("CU")));
        assert_eq!(loc.geolocation_type, GeolocationType::Geoip);
    }

    #[test]
    fn test_force_profile() {
        let loc = determine_user_location(Some(&cc("US")), Some(&cc("CU")), &[cc("CU")], true);
        assert_eq!(loc.country_code, Some(cc("US")));
        let loc = determine_user_location(None, Some(&cc("CU")), &[], true);
        assert_eq!(loc, CustomerLocation::default());
    }

    #[test]
    fn test_product_scoped_blocks() {
        let product = Uuid::from_u128(5);
        let blocks = vec![BlockedCountry::new(cc("KP"), None), BlockedCountry::new(cc("SY"), Some(product))];
        assert!(is_blocked(&cc("KP"), Uuid::from_u128(6), &blocks));
        assert!(!is_blocked(&cc("SY"), Uuid::from_u128(6), &blocks));
        assert!(is_blocked(&cc("SY"), product, &blocks));
        assert_eq!(flagged_countries(FlagKind::Blocked, None, &blocks, &[]), vec![cc("KP")]);
    }

    #[test]
    fn test_tax_precision() {
        let rate = TaxRate::new(cc("GB"), Decimal::new(20, 0), "VAT");
        assert_eq!(rate.tax_for(Decimal::new(1999, 2)), Decimal::new(400, 2));
        let odd = TaxRate::new(cc("DE"), Decimal::new(19, 0), "MwSt");
        assert_eq!(odd.tax_for(Decimal::new(1050, 2)), Decimal::new(200, 2));
    }

    #[test]
    fn test_netblock_contains() {
        let block = NetBlock { ip_start: Ipv4Addr::new(10, 0, 0, 0), ip_end: Ipv4Addr::new(10, 0, 0, 255), country_code: cc("US") };
        assert!(block.contains(Ipv4Addr::new(10, 0, 0, 42)));
        assert!(!block.contains(Ipv4Addr::new(10, 0, 1, 0)));
    }
}
