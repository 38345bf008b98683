use std::cmp::Ordering;

use crate::models::{DamageLevel, Resident};

/// Criteria for narrowing the residents list. Unset fields match everything.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ResidentFilter {
    /// Substring of the head-of-household name, or a prefix of the national id.
    pub search: Option<String>,
    pub family_size: Option<(Ordering, u32)>,
    pub damage_level: Option<DamageLevel>,
    pub neighborhood: Option<String>,
    pub aid_received: Option<bool>,
}

impl ResidentFilter {
    pub fn search(mut self, text: &str) -> Self {
        self.search = Some(text.to_string());
        self
    }

    /// Keep residents whose family size compares to `size` as `ordering`
    /// (`Greater` means strictly more members than `size`).
    pub fn family_size(mut self, ordering: Ordering, size: u32) -> Self {
        self.family_size = Some((ordering, size));
        self
    }

    pub fn damage_level(mut self, level: DamageLevel) -> Self {
        self.damage_level = Some(level);
        self
    }

    pub fn neighborhood(mut self, name: &str) -> Self {
        self.neighborhood = Some(name.to_string());
        self
    }

    pub fn aid_received(mut self, received: bool) -> Self {
        self.aid_received = Some(received);
        self
    }

    pub fn matches(&self, resident: &Resident) -> bool {
        if let Some(text) = self.search.as_deref().map(str::trim) {
            if !text.is_empty()
                && !resident.head_name.to_lowercase().contains(&text.to_lowercase())
                && !resident.national_id.starts_with(text)
            {
                return false;
            }
        }
        if let Some((ordering, size)) = self.family_size {
            if resident.family_size.cmp(&size) != ordering {
                return false;
            }
        }
        if self.damage_level.is_some_and(|level| level != resident.damage_level) {
            return false;
        }
        if let Some(hood) = &self.neighborhood {
            if !resident.neighborhood.trim().eq_ignore_ascii_case(hood.trim()) {
                return false;
            }
        }
        self.aid_received
            .map_or(true, |received| received == resident.aid_received)
    }

    pub fn apply<'a>(&self, residents: impl IntoIterator<Item = &'a Resident>) -> Vec<Resident> {
        residents
            .into_iter()
            .filter(|r| self.matches(r))
            .cloned()
            .collect()
    }
}
