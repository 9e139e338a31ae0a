use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, PoisonError, RwLock};

use minijinja::Environment;
use sha2::{Digest, Sha256};

/// Gives templates an `asset(path)` function that appends a content hash to
/// static URLs, so browsers refetch after a deploy.
#[derive(Debug, Clone)]
pub struct AssetLoader {
    root: PathBuf,
    cache: Arc<RwLock<HashMap<String, String>>>,
}

impl AssetLoader {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            cache: Arc::default(),
        }
    }

    pub fn asset_path(&self, path: &str) -> String {
        let cached = self
            .cache
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(path)
            .cloned();
        if let Some(hashed) = cached {
            return hashed;
        }

        // Missing files are not cached; they may appear later.
        let Ok(contents) = std::fs::read(self.root.join(path)) else {
            return format!("/static/{path}");
        };
        let hash = hex::encode(Sha256::digest(contents));
        let hashed = format!("/static/{path}?v={}", &hash[..12]);
        self.cache
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(path.to_string(), hashed.clone());
        hashed
    }

    pub fn register(self, env: &mut Environment<'_>) {
        env.add_function("asset", move |path: String| self.asset_path(&path));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::tests::temp_dir;

    #[test]
    fn test_asset_path_hashes_existing_files() {
        let root = temp_dir("ansattportal-static");
        std::fs::create_dir_all(&root).unwrap();
        std::fs::write(root.join("app.css"), "body { margin: 0 }").unwrap();

        let loader = AssetLoader::new(&root);
        let hashed = loader.asset_path("app.css");
        assert!(hashed.starts_with("/static/app.css?v="));
        assert_eq!(hashed.len(), "/static/app.css?v=".len() + 12);

        // Served from the cache even after the file is gone.
        std::fs::remove_file(root.join("app.css")).unwrap();
        assert_eq!(loader.asset_path("app.css"), hashed);

        assert_eq!(loader.asset_path("missing.js"), "/static/missing.js");
        std::fs::remove_dir_all(root).ok();
    }

    #[test]
    fn test_registered_function_renders() {
        let mut env = Environment::new();
        AssetLoader::new(temp_dir("ansattportal-static")).register(&mut env);
        let rendered = env
            .render_str(r#"{{ asset("logo.svg") }}"#, minijinja::context! {})
            .unwrap();
        assert_eq!(rendered, "/static/logo.svg");
    }
}
