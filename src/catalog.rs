//! The fixed set of captcha challenges and random selection among them.

use std::path::Path;

use rand::Rng;
use tracing::{info, instrument, warn};

use crate::domain::Challenge;

#[derive(Debug, thiserror::Error)]
pub enum CatalogError {
  #[error("challenge catalog is empty")]
  Empty,

  #[error("challenge image not found: {0} (set CAPTCHA_IMAGE_DIR or list [[challenges]] whose images exist)")]
  MissingImage(String),
}

/// Picks an index in `0..len`. Swappable so tests can drive selection.
pub type Picker = Box<dyn Fn(usize) -> usize + Send + Sync>;

pub fn random_picker() -> Picker {
  Box::new(|len| rand::thread_rng().gen_range(0..len))
}

pub struct ChallengeCatalog {
  entries: Vec<Challenge>,
  picker: Picker,
}

impl ChallengeCatalog {
  pub fn new(entries: Vec<Challenge>, picker: Picker) -> Result<Self, CatalogError> {
    if entries.is_empty() {
      return Err(CatalogError::Empty);
    }
    Ok(Self { entries, picker })
  }

  /// Like `new`, but also requires every image to exist under `image_dir`.
  #[instrument(level = "info", skip_all, fields(image_dir = %image_dir.display(), count = entries.len()))]
  pub fn with_image_dir(entries: Vec<Challenge>, image_dir: &Path, picker: Picker) -> Result<Self, CatalogError> {
    if let Some(missing) = entries.iter().map(|c| image_dir.join(&c.image)).find(|p| !p.is_file()) {
      return Err(CatalogError::MissingImage(missing.display().to_string()));
    }
    let catalog = Self::new(entries, picker)?;
    info!(target: "captcha_gate", count = catalog.len(), "Challenge catalog ready");
    Ok(catalog)
  }

  pub fn len(&self) -> usize {
    self.entries.len()
  }

  pub fn pick_random(&self) -> Challenge {
    let idx = (self.picker)(self.entries.len());
    match self.entries.get(idx) {
      Some(c) => c.clone(),
      None => {
        warn!(target: "captcha", idx, len = self.entries.len(), "Picker returned an invalid index; using first challenge");
        self.entries[0].clone()
      }
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::sync::atomic::{AtomicUsize, Ordering};
  use std::sync::Arc;

  fn entries() -> Vec<Challenge> {
    vec![
      Challenge { image: "a.png".into(), answer: "aaa".into() },
      Challenge { image: "b.png".into(), answer: "bbb".into() },
    ]
  }

  #[test]
  fn empty_catalog_is_rejected() {
    assert!(matches!(ChallengeCatalog::new(vec![], random_picker()), Err(CatalogError::Empty)));
  }

  #[test]
  fn picker_drives_selection() {
    let calls = Arc::new(AtomicUsize::new(0));
    let seen = calls.clone();
    let catalog = ChallengeCatalog::new(entries(), Box::new(move |len| seen.fetch_add(1, Ordering::SeqCst) % len)).unwrap();
    assert_eq!(catalog.pick_random().answer, "aaa");
    assert_eq!(catalog.pick_random().answer, "bbb");
    assert_eq!(calls.load(Ordering::SeqCst), 2);
  }

  #[test]
  fn out_of_range_index_falls_back_to_first() {
    let catalog = ChallengeCatalog::new(entries(), Box::new(|len| len + 10)).unwrap();
    assert_eq!(catalog.pick_random().image, "a.png");
  }

  #[test]
  fn random_picker_stays_in_range() {
    let catalog = ChallengeCatalog::new(entries(), random_picker()).unwrap();
    for _ in 0..50 {
      let c = catalog.pick_random();
      assert!(c.answer == "aaa" || c.answer == "bbb");
    }
  }

  #[test]
  fn missing_image_is_fatal() {
    let dir = std::env::temp_dir();
    let err = ChallengeCatalog::with_image_dir(entries(), &dir.join("no-such-captcha-dir"), random_picker());
    match err {
      Err(CatalogError::MissingImage(path)) => {
        assert!(path.contains("no-such-captcha-dir"));
        assert!(path.ends_with("a.png"));
      }
      _ => panic!("expected MissingImage"),
    }
  }
}
