// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2025 Daniel Negri
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU Affero General Public License for more details.
//
// You should have received a copy of the GNU Affero General Public License
// along with this program. If not, see <https://www.gnu.org/licenses/>.

//! Product price and availability lookup.

use crate::base::{Money, ProductId};
use crate::error::LedgerError;
use async_trait::async_trait;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::io::Read;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Product {
    pub id: ProductId,
    pub name: String,
    pub price: Money,
    pub sale_price: Option<Money>,
    pub active: bool,
}

impl Product {
    /// Sale price when set, list price otherwise.
    pub fn current_price(&self) -> Money {
        self.sale_price.unwrap_or(self.price)
    }
}

/// Read-only view of the storefront catalog.
#[async_trait]
pub trait Catalog: Send + Sync {
    async fn product(&self, id: ProductId) -> Result<Option<Product>, LedgerError>;
}

/// Catalog held in memory, for tests and single-node demos.
#[derive(Default)]
pub struct InMemoryCatalog {
    products: DashMap<ProductId, Product>,
}

impl InMemoryCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, product: Product) {
        self.products.insert(product.id, product);
    }

    /// Loads a JSON array of products.
    pub fn from_json<R: Read>(reader: R) -> Result<Self, LedgerError> {
        let products: Vec<Product> = serde_json::from_reader(reader)
            .map_err(|e| LedgerError::Validation(format!("invalid catalog: {e}")))?;
        let catalog = Self::new();
        for product in products {
            catalog.insert(product);
        }
        Ok(catalog)
    }

    pub fn len(&self) -> usize {
        self.products.len()
    }

    pub fn is_empty(&self) -> bool {
        self.products.is_empty()
    }

    /// Adds an active product at `price` and returns its id.
    pub fn add(&self, name: &str, price: Money) -> ProductId {
        let id = ProductId::new();
        self.insert(Product {
            id,
            name: name.to_string(),
            price,
            sale_price: None,
            active: true,
        });
        id
    }
}

#[async_trait]
impl Catalog for InMemoryCatalog {
    async fn product(&self, id: ProductId) -> Result<Option<Product>, LedgerError> {
        Ok(self.products.get(&id).map(|p| p.clone()))
    }
}
