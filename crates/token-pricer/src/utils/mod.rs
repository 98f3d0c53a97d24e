pub mod request_sharing;
pub mod token_list;
