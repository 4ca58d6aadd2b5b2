//! Building and room resolution

use crate::helpdesk::Room;
use std::collections::BTreeMap;

/// Building code -> canonical building name, loaded from `[buildings]`
#[derive(Debug, Clone, Default)]
pub struct BuildingMap {
    codes: BTreeMap<String, String>,
}

impl BuildingMap {
    pub fn new(table: &BTreeMap<String, String>) -> Self {
        Self {
            codes: table
                .iter()
                .map(|(code, name)| (code.trim().to_uppercase(), name.clone()))
                .collect(),
        }
    }

    /// Codes are matched case-insensitively
    pub fn resolve(&self, code: &str) -> Option<&str> {
        self.codes
            .get(&code.trim().to_uppercase())
            .map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.codes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.codes.is_empty()
    }
}

/// A room name matches when exactly one of "starts with `<number> `" and
/// "equals `<number>`" holds.
pub fn room_name_matches(room_name: &str, room_number: &str) -> bool {
    let prefixed = room_name.starts_with(&format!("{} ", room_number));
    let exact = room_name == room_number;
    prefixed ^ exact
}

/// Find the active room `room_number` in the building behind `building_code`.
///
/// Several matches are narrowed to the exact name; if none of them is exact the
/// room is ambiguous and nothing is returned.
pub fn resolve_room<'r>(
    building_code: &str,
    room_number: &str,
    rooms: &'r [Room],
    buildings: &BuildingMap,
) -> Option<&'r Room> {
    let building = buildings.resolve(building_code)?;

    let candidates: Vec<&Room> = rooms
        .iter()
        .filter(|r| r.is_active && r.building == building)
        .filter(|r| room_name_matches(&r.name, room_number))
        .collect();

    match candidates.as_slice() {
        [] => None,
        [only] => Some(*only),
        many => many.iter().copied().find(|r| r.name == room_number),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn room(id: &str, name: &str, building: &str) -> Room {
        Room {
            room_id: id.into(),
            name: name.into(),
            building: building.into(),
            is_active: true,
        }
    }

    fn buildings() -> BuildingMap {
        let mut table = BTreeMap::new();
        table.insert("chs".to_string(), "Central High School".to_string());
        table.insert("CMS".to_string(), "Central Middle School".to_string());
        BuildingMap::new(&table)
    }

    #[test]
    fn test_building_codes_are_case_insensitive() {
        let map = buildings();
        assert_eq!(map.resolve("CHS"), Some("Central High School"));
        assert_eq!(map.resolve(" cms "), Some("Central Middle School"));
        assert_eq!(map.resolve("XX"), None);
        assert_eq!(map.len(), 2);
    }

    #[test]
    fn test_room_matching_is_exclusive() {
        assert!(room_name_matches("101", "101"));
        assert!(room_name_matches("101 Science Lab", "101"));
        assert!(!room_name_matches("1010", "101"));
        assert!(!room_name_matches("A101", "101"));
        // "10" is a prefix of "100" but not followed by a space
        assert!(!room_name_matches("100", "10"));
    }

    #[test]
    fn test_resolve_room_picks_101_not_1010() {
        let rooms = vec![
            room("r1", "101", "Central High School"),
            room("r2", "1010", "Central High School"),
        ];
        let found = resolve_room("CHS", "101", &rooms, &buildings()).unwrap();
        assert_eq!(found.room_id, "r1");
    }

    #[test]
    fn test_resolve_room_accepts_named_rooms() {
        let rooms = vec![room("r1", "204 Computer Lab", "Central High School")];
        let found = resolve_room("CHS", "204", &rooms, &buildings()).unwrap();
        assert_eq!(found.room_id, "r1");
    }

    #[test]
    fn test_resolve_room_prefers_exact_among_many() {
        let rooms = vec![
            room("r1", "101 Library", "Central High School"),
            room("r2", "101", "Central High School"),
        ];
        let found = resolve_room("CHS", "101", &rooms, &buildings()).unwrap();
        assert_eq!(found.room_id, "r2");
    }

    #[test]
    fn test_resolve_room_ambiguous_without_exact() {
        let rooms = vec![
            room("r1", "101 North", "Central High School"),
            room("r2", "101 South", "Central High School"),
        ];
        assert!(resolve_room("CHS", "101", &rooms, &buildings()).is_none());
    }

    #[test]
    fn test_resolve_room_ignores_other_buildings_and_inactive_rooms() {
        let mut inactive = room("r3", "101", "Central High School");
        inactive.is_active = false;
        let rooms = vec![room("r1", "101", "Central Middle School"), inactive];

        assert!(resolve_room("CHS", "101", &rooms, &buildings()).is_none());
        assert!(resolve_room("ZZ", "101", &rooms, &buildings()).is_none());
        assert_eq!(
            resolve_room("CMS", "101", &rooms, &buildings()).unwrap().room_id,
            "r1"
        );
    }
}
