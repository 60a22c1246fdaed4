pub mod api_client;
pub mod socket_client;
