//! VPS plans and OS images

use crate::core::error::{ApiResult, EntityError, OrderError, ValidationError};
use crate::core::repository::Repository;
use crate::core::validation::validators::{validate_region, validate_slug};
use crate::entities::{VpsImage, VpsPlan};
use chrono::Utc;
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use uuid::Uuid;
use validator::Validate;

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct PlanInput {
    #[validate(custom(function = "validate_slug"))]
    pub slug: String,
    #[validate(length(min = 1, max = 100))]
    pub name: String,
    pub description: Option<String>,
    #[validate(length(min = 1))]
    pub provider_size_slug: String,
    #[validate(range(min = 1, message = "must be at least 1"))]
    pub vcpu: u32,
    #[validate(range(min = 512, message = "must be at least 512"))]
    pub memory_mb: u32,
    #[validate(range(min = 10, message = "must be at least 10"))]
    pub disk_gb: u32,
    #[serde(default)]
    pub transfer_tb: f64,
    #[validate(range(min = 1, message = "must be greater than 0"))]
    pub price_monthly: i64,
    #[validate(length(min = 1, message = "needs at least one region"))]
    pub regions: Vec<String>,
    #[serde(default = "default_true")]
    pub is_active: bool,
    #[serde(default)]
    pub sort_order: i32,
}

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct ImageInput {
    #[validate(length(min = 2, max = 80))]
    pub slug: String,
    #[validate(length(min = 1, max = 100))]
    pub name: String,
    #[validate(length(min = 1, max = 50))]
    pub distribution: String,
    #[serde(default = "default_true")]
    pub is_active: bool,
}

fn default_true() -> bool {
    true
}

fn check_regions(regions: &[String]) -> ApiResult<()> {
    match regions.iter().find(|r| validate_region(r).is_err()) {
        Some(bad) => Err(ValidationError::field("regions", format!("'{}' is not a region slug", bad)).into()),
        None => Ok(()),
    }
}

pub struct CatalogService {
    plans: Arc<dyn Repository<VpsPlan>>,
    images: Arc<dyn Repository<VpsImage>>,
}

impl CatalogService {
    pub fn new(plans: Arc<dyn Repository<VpsPlan>>, images: Arc<dyn Repository<VpsImage>>) -> Self {
        Self { plans, images }
    }

    /// Active plans, cheapest first within each sort group
    pub async fn list_plans(&self) -> ApiResult<Vec<VpsPlan>> {
        let mut plans: Vec<_> = self
            .plans
            .list()
            .await?
            .into_iter()
            .filter(|p| p.is_active)
            .collect();
        plans.sort_by(|a, b| {
            a.sort_order
                .cmp(&b.sort_order)
                .then(a.price_monthly.cmp(&b.price_monthly))
        });
        Ok(plans)
    }

    /// All plans including inactive ones
    pub async fn list_all_plans(&self) -> ApiResult<Vec<VpsPlan>> {
        Ok(self.plans.list().await?)
    }

    /// Look a plan up by id or slug
    pub async fn find_plan(&self, id_or_slug: &str) -> ApiResult<Option<VpsPlan>> {
        if let Ok(id) = Uuid::parse_str(id_or_slug) {
            return Ok(self.plans.get(&id).await?);
        }
        Ok(self.plans.find_one_by("slug", &json!(id_or_slug)).await?)
    }

    /// Public lookup; inactive plans are hidden
    pub async fn get_plan(&self, id_or_slug: &str) -> ApiResult<VpsPlan> {
        self.find_plan(id_or_slug)
            .await?
            .filter(|p| p.is_active)
            .ok_or_else(|| EntityError::not_found("vps_plan", id_or_slug).into())
    }

    /// Plan that a new order may use
    pub async fn orderable_plan(&self, id_or_slug: &str, region: &str) -> ApiResult<VpsPlan> {
        let plan = self
            .find_plan(id_or_slug)
            .await?
            .ok_or_else(|| EntityError::not_found("vps_plan", id_or_slug))?;
        if !plan.is_active {
            return Err(OrderError::Unavailable {
                message: format!("plan '{}' is no longer offered", plan.slug),
            }
            .into());
        }
        if !plan.supports_region(region) {
            return Err(OrderError::Unavailable {
                message: format!("plan '{}' is not available in region '{}'", plan.slug, region),
            }
            .into());
        }
        Ok(plan)
    }

    pub async fn create_plan(&self, input: PlanInput) -> ApiResult<VpsPlan> {
        check_regions(&input.regions)?;
        if self.plans.find_one_by("slug", &json!(input.slug)).await?.is_some() {
            return Err(EntityError::already_exists("vps_plan", "slug", &input.slug).into());
        }
        let now = Utc::now();
        let plan = VpsPlan {
            id: Uuid::new_v4(),
            created_at: now,
            updated_at: now,
            slug: input.slug,
            name: input.name,
            description: input.description,
            provider_size_slug: input.provider_size_slug,
            vcpu: input.vcpu,
            memory_mb: input.memory_mb,
            disk_gb: input.disk_gb,
            transfer_tb: input.transfer_tb,
            price_monthly: input.price_monthly,
            regions: input.regions,
            is_active: input.is_active,
            sort_order: input.sort_order,
        };
        let plan = self.plans.create(plan).await?;
        tracing::info!(plan = %plan.slug, "plan created");
        Ok(plan)
    }

    pub async fn update_plan(&self, id: Uuid, input: PlanInput) -> ApiResult<VpsPlan> {
        check_regions(&input.regions)?;
        let mut plan = self
            .plans
            .get(&id)
            .await?
            .ok_or_else(|| EntityError::not_found("vps_plan", id))?;
        if plan.slug != input.slug
            && self.plans.find_one_by("slug", &json!(input.slug)).await?.is_some()
        {
            return Err(EntityError::already_exists("vps_plan", "slug", &input.slug).into());
        }

        plan.slug = input.slug;
        plan.name = input.name;
        plan.description = input.description;
        plan.provider_size_slug = input.provider_size_slug;
        plan.vcpu = input.vcpu;
        plan.memory_mb = input.memory_mb;
        plan.disk_gb = input.disk_gb;
        plan.transfer_tb = input.transfer_tb;
        plan.price_monthly = input.price_monthly;
        plan.regions = input.regions;
        plan.is_active = input.is_active;
        plan.sort_order = input.sort_order;
        plan.updated_at = Utc::now();
        Ok(self.plans.update(plan).await?)
    }

    /// Plans are never removed because orders reference them
    pub async fn deactivate_plan(&self, id: Uuid) -> ApiResult<VpsPlan> {
        let mut plan = self
            .plans
            .get(&id)
            .await?
            .ok_or_else(|| EntityError::not_found("vps_plan", id))?;
        plan.is_active = false;
        plan.updated_at = Utc::now();
        Ok(self.plans.update(plan).await?)
    }

    pub async fn list_images(&self) -> ApiResult<Vec<VpsImage>> {
        Ok(self
            .images
            .list()
            .await?
            .into_iter()
            .filter(|i| i.is_active)
            .collect())
    }

    pub async fn orderable_image(&self, slug: &str) -> ApiResult<VpsImage> {
        let image = self
            .images
            .find_one_by("slug", &json!(slug))
            .await?
            .ok_or_else(|| EntityError::not_found("vps_image", slug))?;
        if !image.is_active {
            return Err(OrderError::Unavailable {
                message: format!("image '{}' is no longer offered", slug),
            }
            .into());
        }
        Ok(image)
    }

    pub async fn create_image(&self, input: ImageInput) -> ApiResult<VpsImage> {
        if self.images.find_one_by("slug", &json!(input.slug)).await?.is_some() {
            return Err(EntityError::already_exists("vps_image", "slug", &input.slug).into());
        }
        let now = Utc::now();
        let image = VpsImage {
            id: Uuid::new_v4(),
            created_at: now,
            updated_at: now,
            slug: input.slug,
            name: input.name,
            distribution: input.distribution,
            is_active: input.is_active,
        };
        Ok(self.images.create(image).await?)
    }

    pub async fn update_image(&self, id: Uuid, input: ImageInput) -> ApiResult<VpsImage> {
        let mut image = self
            .images
            .get(&id)
            .await?
            .ok_or_else(|| EntityError::not_found("vps_image", id))?;
        if image.slug != input.slug
            && self.images.find_one_by("slug", &json!(input.slug)).await?.is_some()
        {
            return Err(EntityError::already_exists("vps_image", "slug", &input.slug).into());
        }
        image.slug = input.slug;
        image.name = input.name;
        image.distribution = input.distribution;
        image.is_active = input.is_active;
        image.updated_at = Utc::now();
        Ok(self.images.update(image).await?)
    }

    pub async fn deactivate_image(&self, id: Uuid) -> ApiResult<VpsImage> {
        let mut image = self
            .images
            .get(&id)
            .await?
            .ok_or_else(|| EntityError::not_found("vps_image", id))?;
        image.is_active = false;
        image.updated_at = Utc::now();
        Ok(self.images.update(image).await?)
    }
}
