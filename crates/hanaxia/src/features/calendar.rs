//! Local calendar. Not synchronized.

use hanaxia_protocol::CalendarEvent;

use super::{SharedState, generate_id};
use crate::storage::{self, BlobStore, StorageResult};

/// Events ordered by date; ties keep the newest first.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CalendarStore {
    events: Vec<CalendarEvent>,
}

impl CalendarStore {
    pub fn new(mut events: Vec<CalendarEvent>) -> Self {
        events.sort_by(|a, b| a.date.cmp(&b.date));
        Self { events }
    }

    pub fn events(&self) -> &[CalendarEvent] {
        &self.events
    }

    pub fn add(
        &mut self,
        title: &str,
        date: &str,
        description: Option<&str>,
    ) -> Option<CalendarEvent> {
        if title.is_empty() || date.is_empty() {
            return None;
        }
        let event = CalendarEvent {
            id: generate_id(),
            title: title.to_string(),
            date: date.to_string(),
            description: description.map(str::to_string),
        };
        self.events.insert(0, event.clone());
        self.events.sort_by(|a, b| a.date.cmp(&b.date));
        Some(event)
    }

    pub fn remove(&mut self, id: &str) -> bool {
        let before = self.events.len();
        self.events.retain(|e| e.id != id);
        self.events.len() != before
    }
}

pub struct CalendarFeature {
    state: SharedState<CalendarStore>,
}

impl CalendarFeature {
    pub fn new(store: CalendarStore) -> Self {
        Self {
            state: SharedState::new(store),
        }
    }

    pub async fn load(storage: &dyn BlobStore) -> StorageResult<CalendarStore> {
        let events: Option<Vec<CalendarEvent>> =
            storage::load_json(storage, storage::EVENTS_KEY).await?;
        Ok(CalendarStore::new(events.unwrap_or_default()))
    }

    pub async fn persist(&self, storage: &dyn BlobStore) -> StorageResult<()> {
        let events = self.state.read(|s| s.events().to_vec());
        storage::save_json(storage, storage::EVENTS_KEY, &events).await
    }

    pub fn state(&self) -> &SharedState<CalendarStore> {
        &self.state
    }

    pub fn add(&self, title: &str, date: &str, description: Option<&str>) -> Option<CalendarEvent> {
        self.state.update_with(|s| {
            let event = s.add(title, date, description);
            let changed = event.is_some();
            (event, changed)
        })
    }

    pub fn remove(&self, id: &str) -> bool {
        self.state.update_with(|s| {
            let removed = s.remove(id);
            (removed, removed)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryStorage;

    #[test]
    fn test_events_sorted_by_date() {
        let mut store = CalendarStore::default();
        store.add("Review", "2026-03-10", None).unwrap();
        store.add("Kickoff", "2026-01-05", Some("Room 4")).unwrap();
        store.add("Offsite", "2026-02-20", None).unwrap();

        let titles: Vec<&str> = store.events().iter().map(|e| e.title.as_str()).collect();
        assert_eq!(titles, vec!["Kickoff", "Offsite", "Review"]);
    }

    #[test]
    fn test_add_requires_title_and_date() {
        let mut store = CalendarStore::default();
        assert!(store.add("", "2026-01-01", None).is_none());
        assert!(store.add("Standup", "", None).is_none());
        assert!(store.events().is_empty());
    }

    #[tokio::test]
    async fn test_remove_and_persist() {
        let storage = MemoryStorage::new();
        let calendar = CalendarFeature::new(CalendarStore::default());
        let keep = calendar.add("Launch", "2026-06-01", None).unwrap();
        let dry_run = calendar.add("Dry run", "2026-05-20", None).unwrap();

        assert!(calendar.remove(&dry_run.id));
        assert!(!calendar.remove(&dry_run.id));
        calendar.persist(&storage).await.unwrap();

        let reloaded = CalendarFeature::load(&storage).await.unwrap();
        assert_eq!(reloaded.events(), std::slice::from_ref(&keep));
    }
}
