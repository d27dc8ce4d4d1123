// # DNS wire format
//
// Binary TXT query/response handling for RFC 8484 GET requests.
//
// Queries use id 0 so identical requests are cache friendly, and always set
// recursion desired. Each TXT record may carry several character-strings;
// they are concatenated into one value per record.

use altroute_core::{Error, Result};
use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use hickory_proto::op::{Message, MessageType, OpCode, Query, ResponseCode};
use hickory_proto::rr::{Name, RData, RecordType};
use hickory_proto::serialize::binary::BinEncodable;

/// Encode a recursion-desired TXT query for `name`
pub fn build_txt_query(name: &str) -> Result<Vec<u8>> {
    let name = Name::from_ascii(name)
        .map_err(|e| Error::config(format!("Invalid TXT record name '{}': {}", name, e)))?;

    let mut message = Message::new();
    message
        .set_id(0)
        .set_message_type(MessageType::Query)
        .set_op_code(OpCode::Query)
        .set_recursion_desired(true)
        .add_query(Query::query(name, RecordType::TXT));

    message
        .to_vec()
        .map_err(|e| Error::dns(format!("Failed to encode query: {}", e)))
}

/// The `dns` GET parameter for `query`
pub fn encode_query_param(query: &[u8]) -> String {
    URL_SAFE_NO_PAD.encode(query)
}

/// Decode a DoH response and return one text value per TXT answer, in
/// answer order.
///
/// NXDOMAIN is an empty answer, not an error.
pub fn parse_txt_answers(bytes: &[u8]) -> Result<Vec<String>> {
    let message =
        Message::from_vec(bytes).map_err(|e| Error::dns(format!("Malformed response: {}", e)))?;

    if message.message_type() != MessageType::Response {
        return Err(Error::dns("Response is not marked as a response"));
    }
    if message.truncated() {
        return Err(Error::dns("Truncated response"));
    }
    match message.response_code() {
        ResponseCode::NoError => {}
        ResponseCode::NXDomain => return Ok(Vec::new()),
        code => return Err(Error::dns(format!("Server answered {}", code))),
    }

    let texts = message
        .answers()
        .iter()
        .filter_map(|record| match record.data() {
            Some(RData::TXT(txt)) => Some(
                txt.txt_data()
                    .iter()
                    .map(|chunk| String::from_utf8_lossy(chunk))
                    .collect::<String>(),
            ),
            _ => None,
        })
        .collect();

    Ok(texts)
}
