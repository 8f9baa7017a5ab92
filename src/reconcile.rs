use crate::record::{Catalog, GameRecord};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    New,
    Updated,
    Unchanged,
}

/// Merges `record` into `catalog`, keyed by case-folded title.
///
/// An unseen title is appended. A known title is replaced in place when any field
/// differs (URI order included), otherwise the catalog is left untouched.
pub fn reconcile(catalog: &mut Catalog, record: GameRecord) -> Outcome {
    let key = record.key();

    match catalog
        .downloads
        .iter_mut()
        .find(|existing| existing.key() == key)
    {
        Some(existing) if *existing == record => Outcome::Unchanged,
        Some(existing) => {
            *existing = record;
            Outcome::Updated
        }
        None => {
            catalog.downloads.push(record);
            Outcome::New
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use super::{Outcome, reconcile};
    use crate::record::{Catalog, GameRecord};

    fn record(title: &str, uris: &[&str]) -> GameRecord {
        GameRecord {
            title: title.to_owned(),
            upload_date: String::from("2024-01-01"),
            file_size: String::from("1 GB"),
            uris: uris.iter().map(|uri| uri.to_string()).collect(),
        }
    }

    #[test]
    fn test_new_then_unchanged() {
        let mut catalog = Catalog::new("SteamRip");
        let game = record("Celeste", &["https://pixeldrain.com/u/1"]);

        assert_eq!(reconcile(&mut catalog, game.clone()), Outcome::New);
        assert_eq!(reconcile(&mut catalog, game), Outcome::Unchanged);
        assert_eq!(catalog.len(), 1);
    }

    #[test]
    fn test_case_insensitive_update_replaces_record() {
        let mut catalog = Catalog::new("SteamRip");
        reconcile(&mut catalog, record("Celeste", &["https://a.example/1"]));

        let changed = record("CELESTE", &["https://b.example/2"]);
        assert_eq!(reconcile(&mut catalog, changed.clone()), Outcome::Updated);

        assert_eq!(catalog.downloads, vec![changed]);
    }

    #[test]
    fn test_uri_order_counts_as_change() {
        let mut catalog = Catalog::new("SteamRip");
        reconcile(&mut catalog, record("Hades", &["https://a.example/1", "https://b.example/2"]));

        let reordered = record("Hades", &["https://b.example/2", "https://a.example/1"]);

        assert_eq!(reconcile(&mut catalog, reordered), Outcome::Updated);
    }

    #[test]
    fn test_titles_stay_unique() {
        let mut catalog = Catalog::new("SteamRip");

        for title in ["Doom", "doom", "DOOM ", "Quake", "quake", "Doom Eternal"] {
            reconcile(&mut catalog, record(title, &[]));
        }

        let keys = catalog
            .downloads
            .iter()
            .map(GameRecord::key)
            .collect::<HashSet<_>>();

        assert_eq!(keys.len(), catalog.len());
        assert_eq!(catalog.len(), 3);
    }
}
