//! Working out where a customer is for tax and blocking.

use std::net::Ipv4Addr;
use tracing::debug;
use uuid::Uuid;
use crate::domain::aggregates::location::{determine_user_location, flagged_countries};
use crate::domain::aggregates::{CustomerLocationMetadata, FlagKind, User};
use crate::domain::value_objects::CountryCode;
use crate::Result;
use super::Services;

impl Services {
    /// GeoIP country for an address. Anything that isn't IPv4 is unknown.
    pub async fn geoip_country(&self, ip: Option<&str>) -> Result<Option<CountryCode>> {
        let Some(ip) = ip.and_then(|i| i.trim().parse::<Ipv4Addr>().ok()) else { return Ok(None) };
        self.store.geoip_country(ip).await
    }

    /// Locate the customer twice: once against the taxed countries and once
    /// against the countries blocked for `product_id`.
    pub async fn locate_customer(&self, user: &User, ip: Option<&str>, product_id: Option<Uuid>) -> Result<CustomerLocationMetadata> {
        let blocks = self.store.list_blocked_countries().await?;
        let rates = self.store.list_tax_rates().await?;
        let geoip = self.geoip_country(ip).await?;
        let profile = user.country_code.as_ref();
        let force = self.settings.force_profile_country;
        let taxed = flagged_countries(FlagKind::Tax, product_id, &blocks, &rates);
        let blocked = flagged_countries(FlagKind::Blocked, product_id, &blocks, &rates);
        let location = CustomerLocationMetadata {
            user_ip: ip.map(str::to_string),
            location_tax: determine_user_location(profile, geoip.as_ref(), &taxed, force),
            location_block: determine_user_location(profile, geoip.as_ref(), &blocked, force),
        };
        debug!(user = %user.username, ?location, "Located customer");
        Ok(location)
    }
}
