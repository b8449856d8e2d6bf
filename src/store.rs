use crate::models::{
    Category, CategoryAttribute, CategoryTemplate, Listing, Location, Product, ProductSource,
};
use std::collections::HashMap;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("{entity} not found: {key}")]
    NotFound { entity: &'static str, key: String },
    #[error("unique constraint violated: {0}")]
    Conflict(String),
    #[error("storage failure: {0}")]
    Backend(String),
}

impl StoreError {
    pub fn not_found(entity: &'static str, key: impl ToString) -> Self {
        StoreError::NotFound {
            entity,
            key: key.to_string(),
        }
    }
}

pub trait ProductStore: Send + Sync {
    fn insert_product(&self, product: Product) -> Result<(), StoreError>;
    fn update_product(&self, product: Product) -> Result<(), StoreError>;
    fn product(&self, id: Uuid) -> Result<Product, StoreError>;
    fn product_by_source(
        &self,
        shop_id: Uuid,
        source: ProductSource,
        source_id: &str,
    ) -> Result<Option<Product>, StoreError>;
    /// Destroys the product and cascades to its listing, per the data model.
    fn delete_product(&self, id: Uuid) -> Result<(), StoreError>;
}

pub trait CategoryStore: Send + Sync {
    fn insert_category(&self, category: Category) -> Result<(), StoreError>;
    fn update_category(&self, category: Category) -> Result<(), StoreError>;
    fn category(&self, id: Uuid) -> Result<Category, StoreError>;
    fn category_by_external_id(&self, external_id: i64) -> Result<Option<Category>, StoreError>;
    fn category_external_ids(&self) -> Result<Vec<i64>, StoreError>;
    fn delete_categories_by_external_ids(&self, external_ids: &[i64])
    -> Result<usize, StoreError>;
    /// A category with no children is the only valid listing target.
    fn is_leaf(&self, id: Uuid) -> Result<bool, StoreError>;
    /// Find-or-create by (category, external_id). Returns true when created.
    fn upsert_attribute(&self, attribute: CategoryAttribute) -> Result<bool, StoreError>;
    fn attributes_for(&self, category_id: Uuid) -> Result<Vec<CategoryAttribute>, StoreError>;
}

pub trait LocationStore: Send + Sync {
    /// Find-or-create by external_id. Returns true when created.
    fn upsert_location(&self, location: Location) -> Result<bool, StoreError>;
    fn location(&self, id: Uuid) -> Result<Location, StoreError>;
    fn location_by_external_id(&self, external_id: i64) -> Result<Option<Location>, StoreError>;
}

pub trait TemplateStore: Send + Sync {
    fn insert_template(&self, template: CategoryTemplate) -> Result<(), StoreError>;
    fn template(&self, id: Uuid) -> Result<CategoryTemplate, StoreError>;
    /// Lookup for sync-created templates, unique per (shop, category, location).
    fn auto_template(
        &self,
        shop_id: Uuid,
        category_id: Uuid,
        location_id: Option<Uuid>,
    ) -> Result<Option<CategoryTemplate>, StoreError>;
}

pub trait ListingStore: Send + Sync {
    fn insert_listing(&self, listing: Listing) -> Result<(), StoreError>;
    fn update_listing(&self, listing: Listing) -> Result<(), StoreError>;
    fn listing(&self, id: Uuid) -> Result<Listing, StoreError>;
    fn listing_by_external_id(
        &self,
        shop_id: Uuid,
        external_id: &str,
    ) -> Result<Option<Listing>, StoreError>;
    fn listing_for_product(&self, product_id: Uuid) -> Result<Option<Listing>, StoreError>;
}

/// The persistence seam handed to the engines. One backing store may serve
/// every role, as `Stores::in_memory` does.
#[derive(Clone)]
pub struct Stores {
    pub products: Arc<dyn ProductStore>,
    pub categories: Arc<dyn CategoryStore>,
    pub locations: Arc<dyn LocationStore>,
    pub templates: Arc<dyn TemplateStore>,
    pub listings: Arc<dyn ListingStore>,
}

impl Stores {
    pub fn in_memory() -> Self {
        let store = Arc::new(MemoryStore::default());
        Self {
            products: store.clone(),
            categories: store.clone(),
            locations: store.clone(),
            templates: store.clone(),
            listings: store,
        }
    }
}

#[derive(Default)]
pub struct MemoryStore {
    products: RwLock<HashMap<Uuid, Product>>,
    categories: RwLock<HashMap<Uuid, Category>>,
    attributes: RwLock<HashMap<Uuid, CategoryAttribute>>,
    locations: RwLock<HashMap<Uuid, Location>>,
    templates: RwLock<HashMap<Uuid, CategoryTemplate>>,
    listings: RwLock<HashMap<Uuid, Listing>>,
}

fn read<T>(lock: &RwLock<T>) -> Result<RwLockReadGuard<'_, T>, StoreError> {
    lock.read()
        .map_err(|_| StoreError::Backend("poisoned lock".to_string()))
}

fn write<T>(lock: &RwLock<T>) -> Result<RwLockWriteGuard<'_, T>, StoreError> {
    lock.write()
        .map_err(|_| StoreError::Backend("poisoned lock".to_string()))
}

impl ProductStore for MemoryStore {
    fn insert_product(&self, product: Product) -> Result<(), StoreError> {
        let mut products = write(&self.products)?;
        let duplicate = products.values().any(|existing| {
            existing.shop_id == product.shop_id
                && existing.source == product.source
                && existing.source_id == product.source_id
        });
        if duplicate {
            return Err(StoreError::Conflict(format!(
                "product (shop, {}, {}) already exists",
                product.source.as_str(),
                product.source_id
            )));
        }
        products.insert(product.id, product);
        Ok(())
    }

    fn update_product(&self, product: Product) -> Result<(), StoreError> {
        let mut products = write(&self.products)?;
        if !products.contains_key(&product.id) {
            return Err(StoreError::not_found("product", product.id));
        }
        products.insert(product.id, product);
        Ok(())
    }

    fn product(&self, id: Uuid) -> Result<Product, StoreError> {
        read(&self.products)?
            .get(&id)
            .cloned()
            .ok_or_else(|| StoreError::not_found("product", id))
    }

    fn product_by_source(
        &self,
        shop_id: Uuid,
        source: ProductSource,
        source_id: &str,
    ) -> Result<Option<Product>, StoreError> {
        Ok(read(&self.products)?
            .values()
            .find(|product| {
                product.shop_id == shop_id
                    && product.source == source
                    && product.source_id == source_id
            })
            .cloned())
    }

    fn delete_product(&self, id: Uuid) -> Result<(), StoreError> {
        let mut products = write(&self.products)?;
        if products.remove(&id).is_none() {
            return Err(StoreError::not_found("product", id));
        }
        let mut listings = write(&self.listings)?;
        listings.retain(|_, listing| listing.product_id != id);
        Ok(())
    }
}

impl CategoryStore for MemoryStore {
    fn insert_category(&self, category: Category) -> Result<(), StoreError> {
        let mut categories = write(&self.categories)?;
        if categories
            .values()
            .any(|existing| existing.external_id == category.external_id)
        {
            return Err(StoreError::Conflict(format!(
                "category external_id {} already exists",
                category.external_id
            )));
        }
        categories.insert(category.id, category);
        Ok(())
    }

    fn update_category(&self, category: Category) -> Result<(), StoreError> {
        let mut categories = write(&self.categories)?;
        if !categories.contains_key(&category.id) {
            return Err(StoreError::not_found("category", category.id));
        }
        categories.insert(category.id, category);
        Ok(())
    }

    fn category(&self, id: Uuid) -> Result<Category, StoreError> {
        read(&self.categories)?
            .get(&id)
            .cloned()
            .ok_or_else(|| StoreError::not_found("category", id))
    }

    fn category_by_external_id(&self, external_id: i64) -> Result<Option<Category>, StoreError> {
        Ok(read(&self.categories)?
            .values()
            .find(|category| category.external_id == external_id)
            .cloned())
    }

    fn category_external_ids(&self) -> Result<Vec<i64>, StoreError> {
        Ok(read(&self.categories)?
            .values()
            .map(|category| category.external_id)
            .collect())
    }

    fn delete_categories_by_external_ids(
        &self,
        external_ids: &[i64],
    ) -> Result<usize, StoreError> {
        let mut categories = write(&self.categories)?;
        let doomed: Vec<Uuid> = categories
            .values()
            .filter(|category| external_ids.contains(&category.external_id))
            .map(|category| category.id)
            .collect();
        for id in &doomed {
            categories.remove(id);
        }
        let mut attributes = write(&self.attributes)?;
        attributes.retain(|_, attribute| !doomed.contains(&attribute.category_id));
        Ok(doomed.len())
    }

    fn is_leaf(&self, id: Uuid) -> Result<bool, StoreError> {
        Ok(!read(&self.categories)?
            .values()
            .any(|category| category.parent_id == Some(id)))
    }

    fn upsert_attribute(&self, attribute: CategoryAttribute) -> Result<bool, StoreError> {
        let mut attributes = write(&self.attributes)?;
        let existing_id = attributes
            .values()
            .find(|existing| {
                existing.category_id == attribute.category_id
                    && existing.external_id == attribute.external_id
            })
            .map(|existing| existing.id);
        match existing_id {
            Some(id) => {
                let mut updated = attribute;
                updated.id = id;
                attributes.insert(id, updated);
                Ok(false)
            }
            None => {
                attributes.insert(attribute.id, attribute);
                Ok(true)
            }
        }
    }

    fn attributes_for(&self, category_id: Uuid) -> Result<Vec<CategoryAttribute>, StoreError> {
        let mut found: Vec<CategoryAttribute> = read(&self.attributes)?
            .values()
            .filter(|attribute| attribute.category_id == category_id)
            .cloned()
            .collect();
        found.sort_by_key(|attribute| attribute.external_id);
        Ok(found)
    }
}

impl LocationStore for MemoryStore {
    fn upsert_location(&self, location: Location) -> Result<bool, StoreError> {
        let mut locations = write(&self.locations)?;
        let existing_id = locations
            .values()
            .find(|existing| existing.external_id == location.external_id)
            .map(|existing| existing.id);
        match existing_id {
            Some(id) => {
                let mut updated = location;
                updated.id = id;
                locations.insert(id, updated);
                Ok(false)
            }
            None => {
                locations.insert(location.id, location);
                Ok(true)
            }
        }
    }

    fn location(&self, id: Uuid) -> Result<Location, StoreError> {
        read(&self.locations)?
            .get(&id)
            .cloned()
            .ok_or_else(|| StoreError::not_found("location", id))
    }

    fn location_by_external_id(&self, external_id: i64) -> Result<Option<Location>, StoreError> {
        Ok(read(&self.locations)?
            .values()
            .find(|location| location.external_id == external_id)
            .cloned())
    }
}

impl TemplateStore for MemoryStore {
    fn insert_template(&self, template: CategoryTemplate) -> Result<(), StoreError> {
        let mut templates = write(&self.templates)?;
        if template.auto_created {
            let duplicate = templates.values().any(|existing| {
                existing.auto_created
                    && existing.shop_id == template.shop_id
                    && existing.category_id == template.category_id
                    && existing.location_id == template.location_id
            });
            if duplicate {
                return Err(StoreError::Conflict(
                    "auto template for (shop, category, location) already exists".to_string(),
                ));
            }
        }
        templates.insert(template.id, template);
        Ok(())
    }

    fn template(&self, id: Uuid) -> Result<CategoryTemplate, StoreError> {
        read(&self.templates)?
            .get(&id)
            .cloned()
            .ok_or_else(|| StoreError::not_found("template", id))
    }

    fn auto_template(
        &self,
        shop_id: Uuid,
        category_id: Uuid,
        location_id: Option<Uuid>,
    ) -> Result<Option<CategoryTemplate>, StoreError> {
        Ok(read(&self.templates)?
            .values()
            .find(|template| {
                template.auto_created
                    && template.shop_id == shop_id
                    && template.category_id == category_id
                    && template.location_id == location_id
            })
            .cloned())
    }
}

impl ListingStore for MemoryStore {
    fn insert_listing(&self, listing: Listing) -> Result<(), StoreError> {
        let mut listings = write(&self.listings)?;
        if listings
            .values()
            .any(|existing| existing.product_id == listing.product_id)
        {
            return Err(StoreError::Conflict(format!(
                "product {} already has a listing",
                listing.product_id
            )));
        }
        if let Some(external_id) = &listing.external_id
            && listings.values().any(|existing| {
                existing.shop_id == listing.shop_id
                    && existing.external_id.as_deref() == Some(external_id)
            })
        {
            return Err(StoreError::Conflict(format!(
                "listing external id {external_id} already exists"
            )));
        }
        listings.insert(listing.id, listing);
        Ok(())
    }

    fn update_listing(&self, listing: Listing) -> Result<(), StoreError> {
        let mut listings = write(&self.listings)?;
        if !listings.contains_key(&listing.id) {
            return Err(StoreError::not_found("listing", listing.id));
        }
        listings.insert(listing.id, listing);
        Ok(())
    }

    fn listing(&self, id: Uuid) -> Result<Listing, StoreError> {
        read(&self.listings)?
            .get(&id)
            .cloned()
            .ok_or_else(|| StoreError::not_found("listing", id))
    }

    fn listing_by_external_id(
        &self,
        shop_id: Uuid,
        external_id: &str,
    ) -> Result<Option<Listing>, StoreError> {
        Ok(read(&self.listings)?
            .values()
            .find(|listing| {
                listing.shop_id == shop_id && listing.external_id.as_deref() == Some(external_id)
            })
            .cloned())
    }

    fn listing_for_product(&self, product_id: Uuid) -> Result<Option<Listing>, StoreError> {
        Ok(read(&self.listings)?
            .values()
            .find(|listing| listing.product_id == product_id)
            .cloned())
    }
}
