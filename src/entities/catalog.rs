//! VPS plan catalog

crate::impl_data_entity!(
    /// A sellable VPS size
    VpsPlan,
    "vps_plan",
    "vps_plans",
    {
        /// URL-safe unique identifier, e.g. `basic-1gb`
        slug: String,
        name: String,
        description: Option<String>,
        /// DigitalOcean size slug, e.g. `s-1vcpu-1gb`
        provider_size_slug: String,
        vcpu: u32,
        memory_mb: u32,
        disk_gb: u32,
        transfer_tb: f64,
        price_monthly: i64,
        /// Provider region slugs this plan can be deployed to
        regions: Vec<String>,
        is_active: bool,
        sort_order: i32,
    }
);

impl VpsPlan {
    pub fn supports_region(&self, region: &str) -> bool {
        self.regions.iter().any(|r| r == region)
    }
}

crate::impl_data_entity!(
    /// An operating system image customers can pick
    VpsImage,
    "vps_image",
    "vps_images",
    {
        /// DigitalOcean image slug, e.g. `ubuntu-24-04-x64`
        slug: String,
        name: String,
        distribution: String,
        is_active: bool,
    }
);
