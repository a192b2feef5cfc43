use std::{
    fs,
    io::Cursor,
    path::PathBuf,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
    time::{SystemTime, UNIX_EPOCH},
};

use async_trait::async_trait;
use blob_storage::FsBlobStore;
use image::{DynamicImage, ImageFormat, Rgba, RgbaImage};
use remove_bg_client::{AccountCredits, BackgroundRemover, RemoveBgError, RemovedBackground};

use crate::{AuthenticatedUser, ServiceContext, UploadLimits, UploadedFile};

pub(crate) const LEFT: Rgba<u8> = Rgba([255, 0, 0, 255]);
pub(crate) const RIGHT: Rgba<u8> = Rgba([0, 0, 255, 0]);

#[derive(Debug, Clone, Copy)]
pub(crate) enum RemoverBehavior {
    PassThrough { credits_charged: f64 },
    CreditsExhausted,
}

/// Stands in for remove.bg: returns the input unchanged (it is already a
/// PNG in tests) or fails the way the real API does.
pub(crate) struct FakeRemover {
    behavior: RemoverBehavior,
    pub(crate) calls: AtomicUsize,
}

#[async_trait]
impl BackgroundRemover for FakeRemover {
    async fn remove_background(
        &self,
        image: Vec<u8>,
        _filename: &str,
    ) -> Result<RemovedBackground, RemoveBgError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match self.behavior {
            RemoverBehavior::PassThrough { credits_charged } => Ok(RemovedBackground {
                image,
                credits_charged,
            }),
            RemoverBehavior::CreditsExhausted => Err(RemoveBgError::CreditsExhausted),
        }
    }

    async fn account_credits(&self) -> Result<AccountCredits, RemoveBgError> {
        match self.behavior {
            RemoverBehavior::PassThrough { .. } => Ok(AccountCredits {
                total: 50.0,
                subscription: 0.0,
                payg: 50.0,
                enterprise: 0.0,
                free_api_calls: 50,
            }),
            RemoverBehavior::CreditsExhausted => Err(RemoveBgError::CreditsExhausted),
        }
    }
}

pub(crate) struct Harness {
    root: PathBuf,
    pub(crate) storage_root: PathBuf,
    pub(crate) remover: Arc<FakeRemover>,
    pub(crate) ctx: ServiceContext,
}

impl Harness {
    pub(crate) fn new(prefix: &str) -> Self {
        Self::with_remover(prefix, RemoverBehavior::PassThrough { credits_charged: 1.0 })
    }

    pub(crate) fn with_remover(prefix: &str, behavior: RemoverBehavior) -> Self {
        let mut root = std::env::temp_dir();
        root.push(format!("{prefix}-{}", unique_id()));
        fs::create_dir_all(&root).expect("failed to create temp root");

        let db_path = root.join("cutout.sqlite");
        app_storage::migrations::run_migrations_at(&db_path).expect("failed to run migrations");

        let storage_root = root.join("storage");
        let remover = Arc::new(FakeRemover {
            behavior,
            calls: AtomicUsize::new(0),
        });

        let ctx = ServiceContext {
            db_path,
            blobs: Arc::new(FsBlobStore::new(&storage_root, "http://127.0.0.1:8080")),
            background_remover: remover.clone(),
            limits: UploadLimits::default(),
        };

        Self {
            root,
            storage_root,
            remover,
            ctx,
        }
    }

    pub(crate) fn stored_object_count(&self, bucket: &str) -> usize {
        fs::read_dir(self.storage_root.join(bucket))
            .map(|entries| entries.count())
            .unwrap_or(0)
    }
}

impl Drop for Harness {
    fn drop(&mut self) {
        let _ = fs::remove_dir_all(&self.root);
    }
}

pub(crate) fn user(id: &str) -> AuthenticatedUser {
    AuthenticatedUser {
        id: id.to_string(),
        email: format!("{id}@example.com"),
        name: None,
    }
}

/// 2x1 PNG: opaque red on the left, transparent blue on the right.
pub(crate) fn two_pixel_png() -> Vec<u8> {
    let mut img = RgbaImage::new(2, 1);
    img.put_pixel(0, 0, LEFT);
    img.put_pixel(1, 0, RIGHT);

    let mut buffer = Cursor::new(Vec::new());
    DynamicImage::ImageRgba8(img)
        .write_to(&mut buffer, ImageFormat::Png)
        .expect("failed to encode fixture");
    buffer.into_inner()
}

pub(crate) fn png_upload(filename: &str) -> UploadedFile {
    UploadedFile {
        filename: filename.to_string(),
        content_type: "image/png".to_string(),
        bytes: two_pixel_png(),
    }
}

fn unique_id() -> u128 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("system clock error")
        .as_nanos()
}
