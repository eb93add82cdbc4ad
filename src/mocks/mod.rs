pub mod mock_link;
pub mod mock_transport;
