//! Macros for reducing boilerplate when defining records
//!
//! Every record carries the same base fields (`id`, `created_at`,
//! `updated_at`). [`impl_data_entity!`] injects them and implements
//! [`Entity`](crate::core::entity::Entity) so the record can be stored in any
//! [`Repository`](crate::core::repository::Repository).

/// Define a record struct with base fields and an `Entity` implementation
///
/// # Example
///
/// ```rust,ignore
/// use webrana::impl_data_entity;
///
/// impl_data_entity!(
///     VpsImage,
///     "vps_image",
///     "vps_images",
///     {
///         /// Provider image slug
///         slug: String,
///         name: String,
///         is_active: bool,
///     }
/// );
/// ```
#[macro_export]
macro_rules! impl_data_entity {
    (
        $(#[$struct_meta:meta])*
        $type:ident,
        $singular:expr,
        $plural:expr,
        {
            $( $(#[$field_meta:meta])* $field:ident : $field_type:ty ),* $(,)?
        }
    ) => {
        $(#[$struct_meta])*
        #[derive(Debug, Clone, PartialEq, ::serde::Serialize, ::serde::Deserialize)]
        pub struct $type {
            /// Unique identifier
            pub id: ::uuid::Uuid,

            /// When this record was created
            pub created_at: ::chrono::DateTime<::chrono::Utc>,

            /// When this record was last updated
            pub updated_at: ::chrono::DateTime<::chrono::Utc>,

            $( $(#[$field_meta])* pub $field : $field_type ),*
        }

        impl $crate::core::entity::Entity for $type {
            fn resource_name() -> &'static str {
                $plural
            }

            fn resource_name_singular() -> &'static str {
                $singular
            }

            fn id(&self) -> ::uuid::Uuid {
                self.id
            }

            fn created_at(&self) -> ::chrono::DateTime<::chrono::Utc> {
                self.created_at
            }

            fn updated_at(&self) -> ::chrono::DateTime<::chrono::Utc> {
                self.updated_at
            }

            fn touch(&mut self) {
                self.updated_at = ::chrono::Utc::now();
            }
        }
    };
}
