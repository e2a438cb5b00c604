//! Vehicle category and service class catalog.
//!
//! The backend exposes richer DTOs than the planner needs; mapping keeps
//! only id and display label and drops inactive entries.

use serde::Deserialize;

/// Backend DTO for a vehicle category.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VehicleCategoryDto {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub is_active: Option<bool>,
}

/// Backend DTO for a service class.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceClassDto {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub is_active: Option<bool>,
}

/// A selectable vehicle category.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VehicleCategory {
    pub id: String,
    pub label: String,
}

/// A selectable service class.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceClass {
    pub id: String,
    pub label: String,
}

/// Map active category DTOs, preserving order.
pub fn map_vehicle_categories(dtos: Vec<VehicleCategoryDto>) -> Vec<VehicleCategory> {
    dtos.into_iter()
        .filter(|d| d.is_active != Some(false))
        .map(|d| VehicleCategory {
            id: d.id,
            label: d.name,
        })
        .collect()
}

/// Map active service class DTOs, preserving order.
pub fn map_service_classes(dtos: Vec<ServiceClassDto>) -> Vec<ServiceClass> {
    dtos.into_iter()
        .filter(|d| d.is_active != Some(false))
        .map(|d| ServiceClass {
            id: d.id,
            label: d.name,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn inactive_entries_are_dropped() {
        let dtos = vec![
            VehicleCategoryDto {
                id: "car".into(),
                name: "Car".into(),
                description: None,
                is_active: Some(true),
            },
            VehicleCategoryDto {
                id: "bike".into(),
                name: "Bike".into(),
                description: None,
                is_active: Some(false),
            },
            VehicleCategoryDto {
                id: "van".into(),
                name: "Van".into(),
                description: None,
                is_active: None,
            },
        ];

        let mapped = map_vehicle_categories(dtos);
        assert_eq!(mapped.len(), 2);
        assert_eq!(mapped[0].id, "car");
        assert_eq!(mapped[1].id, "van");
    }
}
