pub mod account_credits;
pub mod create_transformation;
pub mod delete_image;
pub mod get_image;
pub mod list_images;
pub mod render_thumbnail;
pub mod upload_image;

#[cfg(test)]
pub(crate) mod test_support;
