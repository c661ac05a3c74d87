//! Prompt text for each oracle request kind.
//!
//! These rules are the oracle's contract. The pipeline cannot verify them; it
//! only validates the structure of what comes back.

use crate::oracle::OracleRequest;
use crate::schema::CanonicalField;

const MAPPING_SYSTEM: &str = "You are a helpful assistant specializing in mapping data columns.";

const INFERENCE_SYSTEM: &str = "You are an advanced data processing assistant. Your primary function is to map the data based on the provided instructions.
Take your time, carefully go through each instruction, and do not hallucinate or create data on your own.";

/// Render `(system, user)` prompts for a request.
pub fn render(request: &OracleRequest<'_>) -> (String, String) {
    match *request {
        OracleRequest::ColumnMapping {
            headers,
            fields,
            sample_row,
        } => (MAPPING_SYSTEM.to_string(), column_mapping(headers, fields, sample_row)),
        OracleRequest::Sideband {
            blob,
            fields,
            suppliers,
            excluded_suppliers,
        } => (
            MAPPING_SYSTEM.to_string(),
            sideband(blob, fields, suppliers, excluded_suppliers),
        ),
        OracleRequest::CsvInference { blob, fields } => {
            (INFERENCE_SYSTEM.to_string(), csv_inference(blob, fields))
        }
    }
}

fn field_list(fields: &[CanonicalField]) -> String {
    let titles: Vec<String> = fields.iter().map(|f| format!("\"{}\"", f.header())).collect();
    format!("[{}]", titles.join(", "))
}

fn quoted_list(values: &[String]) -> String {
    let quoted: Vec<String> = values.iter().map(|v| format!("\"{}\"", v)).collect();
    format!("[{}]", quoted.join(", "))
}

fn column_mapping(headers: &[String], fields: &[CanonicalField], sample_row: &str) -> String {
    format!(
        r#"header: {headers}
desired columns: {fields}
sample_raw_data: {sample_row}

Provide a JSON object mapping every desired column to its corresponding header from the raw data. If a desired column cannot be mapped, its value must be an empty string.
Rules:
- Only use the desired columns above as keys. Do not add any other key.
- Values must be copied exactly from the header list.
- Item can contain different types of services, hardware, devices and software such as professional services, subscription, routers and cabling. Item is a purchasable good or service, never an id or a number.
- If a descriptive column exists, map it to Description only.

Example output: {{"Desired ColumnA": "Header1", "Desired ColumnB": "Header2", "Desired ColumnC": ""}}
Return only the JSON object. No other text, no ```json fences."#,
        headers = quoted_list(headers),
        fields = field_list(fields),
        sample_row = sample_row,
    )
}

fn sideband(
    blob: &str,
    fields: &[CanonicalField],
    suppliers: &[String],
    excluded_suppliers: &[String],
) -> String {
    let supplier_hint = if suppliers.is_empty() {
        "Look thoroughly through the raw data for the supplier.".to_string()
    } else {
        format!(
            "Known suppliers: {}. If one of them appears in the raw data, use it as Supplier; otherwise look thoroughly for the supplier.",
            quoted_list(suppliers)
        )
    };

    format!(
        r#"desired columns: {fields}
raw_data:
{blob}

Provide a JSON object where each desired column is associated with its value from the raw data. Give each column at most one value. If a desired column cannot be found, its value must be an empty string.
Rules:
- {supplier_hint}
- Supplier must never be any of {excluded}; those names are the buyer, not the supplier.
- Date must be formatted like "14-Nov-2024".
- Currency must be an ISO 4217 code (e.g. USD, EUR).
- Do not derive Country or City from a company address or a company name.

Example output: {{"Desired ColumnA": "value 1", "Desired ColumnB": "value 2", "Desired ColumnC": ""}}
Return only the JSON object. No other text, no ```json fences."#,
        fields = field_list(fields),
        blob = blob,
        supplier_hint = supplier_hint,
        excluded = quoted_list(excluded_suppliers),
    )
}

fn csv_inference(blob: &str, fields: &[CanonicalField]) -> String {
    let header_line: Vec<String> = fields.iter().map(|f| format!("\"{}\"", f.header())).collect();

    format!(
        r#"Follow the rules below for the respective columns and map the data accordingly.

Supplier:
  - Identify the supplier name from an email address if it is not mentioned explicitly.

Item & Description:
  - Item can contain different types of services such as professional services, testing, installation, labour, support, subscription and cabling.
  - Item cannot be empty.

Currency:
  - Identify the currency from prefixes or symbols such as USD, $, EUR, £, ¥, ₹. "$100" is USD.
  - Use ISO 4217 codes.

Hours:
  - Identify hours from keywords or patterns like 4Hour, 24X7, or a range of hours, days or weeks.
  - Convert the pattern into a number of hours: 24x7x1 is 168 hours, 8x5xNBD is 40 hours.
  - Leave it blank if not found. Never write NaN.

Unit Cost:
  - If the unit cost is not given, divide the total cost by the quantity.

Total Cost:
  - The source column may be called total amount, total cost, total price and so on.
  - If the currency is USD, "Unit Cost" and "Unit Cost (USD)" are the same.
  - Otherwise convert "Unit Cost" to USD into "Unit Cost (USD)".

Output:
  - Services can be spread over several columns; add each identified service as its own row.
  - Return CSV only, every value quoted, with this exact header line:
{header}
  - Do not wrap the CSV in ```csv fences and do not add any other text.

Map the data below to the columns {fields}. The first row of each table is its header.

{blob}"#,
        header = header_line.join(","),
        fields = field_list(fields),
        blob = blob,
    )
}
