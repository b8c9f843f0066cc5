//! Built-in captcha catalog, used when the config file lists no challenges.

use crate::domain::Challenge;

/// Image file names are relative to the configured image directory. The images
/// themselves are not bundled: drop files with these names (showing these answers)
/// into `CAPTCHA_IMAGE_DIR`, or configure `[[challenges]]`, otherwise startup
/// fails with `CatalogError::MissingImage`.
pub fn seed_challenges() -> Vec<Challenge> {
  [
    ("captcha-01.png", "x7kq2"),
    ("captcha-02.png", "m4tpz"),
    ("captcha-03.png", "r9wde"),
    ("captcha-04.png", "b2hnc"),
    ("captcha-05.png", "f6jsv"),
    ("captcha-06.png", "q3lay"),
  ]
  .into_iter()
  .map(|(image, answer)| Challenge { image: image.into(), answer: answer.into() })
  .collect()
}
