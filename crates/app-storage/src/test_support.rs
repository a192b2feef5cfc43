use std::{
    fs,
    path::PathBuf,
    time::{SystemTime, UNIX_EPOCH},
};

use crate::{images, migrations, users};

pub(crate) struct TempDb {
    root: PathBuf,
    pub(crate) db_path: PathBuf,
}

impl TempDb {
    pub(crate) fn new(prefix: &str) -> Self {
        let mut root = std::env::temp_dir();
        root.push(format!("{prefix}-{}", unique_id()));
        fs::create_dir_all(&root).expect("failed to create temp root");

        let db_path = root.join("cutout-test.sqlite");
        migrations::run_migrations_at(&db_path).expect("failed to run test migrations");

        Self { root, db_path }
    }

    pub(crate) fn seed_user(&self, user_id: &str) {
        users::upsert_user(
            &self.db_path,
            &users::NewUser {
                id: user_id.to_string(),
                email: format!("{user_id}@example.com"),
                name: None,
            },
        )
        .expect("failed to seed user");
    }

    pub(crate) fn seed_image(&self, user_id: &str, filename: &str) -> images::ImageRecord {
        images::insert_image(
            &self.db_path,
            &images::NewImage {
                user_id: user_id.to_string(),
                original_url: format!("http://localhost/storage/v1/object/public/images/{filename}"),
                original_filename: filename.to_string(),
                mime_type: "image/png".to_string(),
                file_size: 128,
                width: Some(4),
                height: Some(2),
            },
        )
        .expect("failed to seed image")
    }
}

impl Drop for TempDb {
    fn drop(&mut self) {
        let _ = fs::remove_dir_all(&self.root);
    }
}

fn unique_id() -> u128 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("system clock error")
        .as_nanos()
}
