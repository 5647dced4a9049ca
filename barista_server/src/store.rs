//! The in-memory drinks menu

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::RwLock;

/// One part of a recipe
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ingredient {
    pub name: String,
    pub color: String,
    pub parts: u32,
}

/// A drink on the menu
///
/// Serializes to the long form, which names each ingredient.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct Drink {
    pub id: u64,
    pub title: String,
    pub recipe: Vec<Ingredient>,
}

/// The public view of a drink, which shows what it looks like but not what
/// goes into it
#[derive(Debug, Serialize)]
pub struct ShortDrink<'a> {
    id: u64,
    title: &'a str,
    recipe: Vec<ShortIngredient<'a>>,
}

#[derive(Debug, Serialize)]
struct ShortIngredient<'a> {
    color: &'a str,
    parts: u32,
}

impl Drink {
    pub fn short(&self) -> ShortDrink<'_> {
        ShortDrink {
            id: self.id,
            title: &self.title,
            recipe: self
                .recipe
                .iter()
                .map(|i| ShortIngredient {
                    color: &i.color,
                    parts: i.parts,
                })
                .collect(),
        }
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum StoreError {
    #[error("drink {id} not found")]
    NotFound { id: u64 },

    #[error("a drink titled '{title}' already exists")]
    DuplicateTitle { title: String },
}

#[derive(Debug, Default)]
struct Menu {
    last_id: u64,
    drinks: BTreeMap<u64, Drink>,
}

impl Menu {
    fn ensure_unique(&self, title: &str, except: Option<u64>) -> Result<(), StoreError> {
        let taken = self
            .drinks
            .values()
            .any(|d| d.title == title && Some(d.id) != except);

        if taken {
            Err(StoreError::DuplicateTitle {
                title: title.to_owned(),
            })
        } else {
            Ok(())
        }
    }
}

/// Drinks keyed by id, in creation order
#[derive(Debug, Default)]
pub struct DrinkStore {
    menu: RwLock<Menu>,
}

impl DrinkStore {
    pub async fn all(&self) -> Vec<Drink> {
        self.menu.read().await.drinks.values().cloned().collect()
    }

    pub async fn insert(&self, title: String, recipe: Vec<Ingredient>) -> Result<Drink, StoreError> {
        let mut menu = self.menu.write().await;
        menu.ensure_unique(&title, None)?;

        menu.last_id += 1;
        let drink = Drink {
            id: menu.last_id,
            title,
            recipe,
        };
        menu.drinks.insert(drink.id, drink.clone());

        Ok(drink)
    }

    /// Replaces whichever of the title and recipe are given
    pub async fn update(
        &self,
        id: u64,
        title: Option<String>,
        recipe: Option<Vec<Ingredient>>,
    ) -> Result<Drink, StoreError> {
        let mut menu = self.menu.write().await;

        if !menu.drinks.contains_key(&id) {
            return Err(StoreError::NotFound { id });
        }
        if let Some(title) = &title {
            menu.ensure_unique(title, Some(id))?;
        }

        let drink = menu
            .drinks
            .get_mut(&id)
            .ok_or(StoreError::NotFound { id })?;
        if let Some(title) = title {
            drink.title = title;
        }
        if let Some(recipe) = recipe {
            drink.recipe = recipe;
        }

        Ok(drink.clone())
    }

    pub async fn remove(&self, id: u64) -> Result<Drink, StoreError> {
        self.menu
            .write()
            .await
            .drinks
            .remove(&id)
            .ok_or(StoreError::NotFound { id })
    }
}
