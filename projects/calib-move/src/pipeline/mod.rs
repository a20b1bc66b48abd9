// Reference frame construction and homography tracking

pub mod blend;
pub mod features;
pub mod homography;
pub mod tracker;
pub mod types;
