//! Protobuf records carried in Mercury message parts.

/// First part of every Mercury message.
#[derive(Clone, PartialEq, prost::Message)]
pub struct Header {
    #[prost(string, optional, tag = "1")]
    pub uri: Option<String>,
    #[prost(string, optional, tag = "2")]
    pub content_type: Option<String>,
    #[prost(string, optional, tag = "3")]
    pub method: Option<String>,
    #[prost(sint32, optional, tag = "4")]
    pub status_code: Option<i32>,
    #[prost(message, repeated, tag = "6")]
    pub user_fields: Vec<UserField>,
}

/// Free-form key/value attached to a header.
#[derive(Clone, PartialEq, prost::Message)]
pub struct UserField {
    #[prost(string, optional, tag = "1")]
    pub key: Option<String>,
    #[prost(bytes = "vec", optional, tag = "2")]
    pub value: Option<Vec<u8>>,
}

/// One entry of a subscribe acknowledgement.
#[derive(Clone, PartialEq, prost::Message)]
pub struct Subscription {
    #[prost(string, optional, tag = "1")]
    pub uri: Option<String>,
    #[prost(int32, optional, tag = "2")]
    pub expiry: Option<i32>,
    #[prost(int32, optional, tag = "3")]
    pub status_code: Option<i32>,
}
