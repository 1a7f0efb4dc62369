//! Entity mappers: raw records to mutation descriptors.
//!
//! Each entity type is first parsed into a typed record (required fields
//! checked, values normalized), then turned into a descriptor. Everything here
//! is pure; failures come back as `RecordError` values.

use chrono::{DateTime, NaiveDate, NaiveDateTime, TimeZone, Utc};

use riskgraph_core::{
    EdgeUpsert, EntityType, MutationDescriptor, NodeKey, NodeUpsert, RawRecord, RecordError,
    RelType, ScalarValue,
};

// ── Field Names ──────────────────────────────────────────────────

/// Canonical name first, then the column names used by the source exports.
type Field = &'static [&'static str];

const LOGIN: Field = &["login", "loginId", "cif_user_id"];
const PHONE: Field = &["phone", "phone_num", "mobile_phone"];
const DEVICE_NO: Field = &["deviceNo", "device_no"];
const TD_DEVICE_ID: Field = &["tdDeviceId", "td_device_id"];
const REMOTE_IP: Field = &["remoteIp", "remote_ip"];
const LOGIN_TIME: Field = &["loginTime", "login_time"];

const CUSTOMER_ID: Field = &["customerId", "customer_id", "id"];
const ACCOUNT_REF: Field = &["accountRef", "account_ref", "cif_user_id"];
const IDENTITY_NO: Field = &["identityNo", "identity_no"];
const MODIFIED_AT: Field = &["modifiedAt", "modify_date"];

const CUSTOMER_REF: Field = &["customerRef", "customer_ref", "cid", "uid"];
const LINKMAN_ID: Field = &["linkmanId", "mobile_phone", "second_mobile_phone"];
const LINKMAN_NAME: Field = &["name", "linkman_name"];
const RELATION: Field = &["relation", "relationship"];
const LINKMAN_MODIFIED_AT: Field = &["modifiedAt", "modify_date", "create_date"];

const LATITUDE: Field = &["latitude", "lat"];
const LONGITUDE: Field = &["longitude", "lng", "lon"];
const GPS_TIME: Field = &["timestamp", "create_date", "create_time"];
const GEO_CODE: Field = &["geoCode", "geo_code"];

const ORDER_ID: Field = &["orderId", "order_id", "id"];
const ORDER_CUSTOMER_REF: Field = &["customerRef", "customer_ref", "user_id", "uid"];
const ORDER_STATUS: Field = &["status", "order_status"];
const APPLIED_AT: Field = &["appliedAt", "apply_loan_date"];
const SIGNED_AT: Field = &["signedAt", "sign_date"];
const APPLY_PHONE: Field = &["phone", "apply_loan_tel"];
const APPLY_IDENTITY_NO: Field = &["identityNo", "apply_ident_no"];
const CARD_NO: Field = &["cardNo", "apply_card_no"];
const REPAY_CARD_NO: Field = &["repayCardNo", "repay_card_no"];
const CARD_PHONE: Field = &["cardPhone", "apply_bank_mobile"];
const REPAY_CARD_PHONE: Field = &["repayCardPhone", "repay_bank_mobile"];

const REASON: Field = &["reason", "c_reason_list"];
const ENTRY_ID: Field = &["entryId", "entry_id"];
const LISTED_AT: Field = &["listedAt", "listed_at"];
const SUBJECT_CUSTOMER: Field = &["customerRef", "customer_ref"];
const SUBJECT_ACCOUNT: Field = &["accountRef", "account_ref"];

// ── Field Access ─────────────────────────────────────────────────

/// Reads fields by alias and collects every missing required one, so a
/// validation error names all offending fields at once.
struct FieldReader<'a> {
    record: &'a RawRecord,
    missing: Vec<String>,
}

impl<'a> FieldReader<'a> {
    fn new(record: &'a RawRecord) -> Self {
        Self {
            record,
            missing: Vec::new(),
        }
    }

    /// First alias with a non-empty value.
    fn scalar(&self, field: Field) -> Option<&'a ScalarValue> {
        field
            .iter()
            .filter_map(|name| self.record.get(name))
            .find(|v| v.as_text().is_some())
    }

    fn optional(&self, field: Field) -> Option<String> {
        self.scalar(field).and_then(ScalarValue::as_text)
    }

    /// Empty string when missing; `finish` reports it.
    fn required(&mut self, field: Field) -> String {
        match self.optional(field) {
            Some(v) => v,
            None => {
                self.missing.push(field[0].to_string());
                String::new()
            }
        }
    }

    fn required_scalar(&mut self, field: Field) -> Option<&'a ScalarValue> {
        let value = self.scalar(field);
        if value.is_none() {
            self.missing.push(field[0].to_string());
        }
        value
    }

    fn optional_timestamp(&self, field: Field) -> Result<Option<DateTime<Utc>>, RecordError> {
        self.scalar(field)
            .map(|v| parse_timestamp(v).ok_or_else(|| unparsable(field, v)))
            .transpose()
    }

    fn finish(self) -> Result<(), RecordError> {
        if self.missing.is_empty() {
            Ok(())
        } else {
            Err(RecordError::Validation {
                fields: self.missing,
            })
        }
    }
}

fn unparsable(field: Field, value: &ScalarValue) -> RecordError {
    RecordError::mapping(
        field[0],
        format!("unparsable value {:?}", value.as_text().unwrap_or_default()),
    )
}

/// Keys are compared case-insensitively and without surrounding whitespace.
pub fn normalize_key(raw: &str) -> String {
    raw.trim().to_lowercase()
}

/// Accepts RFC 3339, the common `YYYY-MM-DD HH:MM:SS` family, bare dates
/// (midnight UTC), and integers as Unix seconds. Naive values are taken as UTC.
pub fn parse_timestamp(value: &ScalarValue) -> Option<DateTime<Utc>> {
    const DATETIME_FORMATS: [&str; 6] = [
        "%Y-%m-%d %H:%M:%S%.f",
        "%Y-%m-%d %H:%M:%S",
        "%Y-%m-%dT%H:%M:%S%.f",
        "%Y-%m-%dT%H:%M:%S",
        "%Y/%m/%d %H:%M:%S",
        "%Y-%m-%d %H:%M",
    ];
    const DATE_FORMATS: [&str; 3] = ["%Y-%m-%d", "%Y/%m/%d", "%Y%m%d"];

    let text = match value {
        ScalarValue::Timestamp(ts) => return Some(*ts),
        ScalarValue::Integer(secs) => return Utc.timestamp_opt(*secs, 0).single(),
        other => other.as_text()?,
    };

    if let Ok(ts) = DateTime::parse_from_rfc3339(&text) {
        return Some(ts.with_timezone(&Utc));
    }
    for fmt in DATETIME_FORMATS {
        if let Ok(naive) = NaiveDateTime::parse_from_str(&text, fmt) {
            return Some(naive.and_utc());
        }
    }
    for fmt in DATE_FORMATS {
        if let Ok(date) = NaiveDate::parse_from_str(&text, fmt) {
            return date.and_hms_opt(0, 0, 0).map(|naive| naive.and_utc());
        }
    }
    None
}

fn parse_coordinate(
    field: Field,
    value: &ScalarValue,
    bound: f64,
) -> Result<f64, RecordError> {
    let parsed = match value {
        ScalarValue::Float(f) => Some(*f),
        ScalarValue::Integer(i) => Some(*i as f64),
        other => other.as_text().and_then(|t| t.parse::<f64>().ok()),
    };
    match parsed {
        Some(v) if v.is_finite() && v.abs() <= bound => Ok(v),
        Some(v) => Err(RecordError::mapping(
            field[0],
            format!("{v} is outside [-{bound}, {bound}]"),
        )),
        None => Err(unparsable(field, value)),
    }
}

// ── Typed Records ────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub struct AccountRecord {
    pub login: String,
    pub phone: Option<String>,
    pub device_no: Option<String>,
    pub td_device_id: Option<String>,
    pub remote_ip: Option<String>,
    pub login_time: Option<DateTime<Utc>>,
}

impl AccountRecord {
    pub fn parse(record: &RawRecord) -> Result<Self, RecordError> {
        let mut r = FieldReader::new(record);
        let login = r.required(LOGIN);
        r.finish()?;
        let r = FieldReader::new(record);
        Ok(Self {
            login: normalize_key(&login),
            phone: r.optional(PHONE),
            device_no: r.optional(DEVICE_NO),
            td_device_id: r.optional(TD_DEVICE_ID),
            remote_ip: r.optional(REMOTE_IP),
            login_time: r.optional_timestamp(LOGIN_TIME)?,
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct CustomerRecord {
    pub customer_id: String,
    pub account_ref: Option<String>,
    pub phone: Option<String>,
    pub identity_no: Option<String>,
    pub modified_at: Option<DateTime<Utc>>,
}

impl CustomerRecord {
    pub fn parse(record: &RawRecord) -> Result<Self, RecordError> {
        let mut r = FieldReader::new(record);
        let customer_id = r.required(CUSTOMER_ID);
        r.finish()?;
        let r = FieldReader::new(record);
        Ok(Self {
            customer_id: normalize_key(&customer_id),
            account_ref: r.optional(ACCOUNT_REF).map(|v| normalize_key(&v)),
            phone: r.optional(PHONE),
            identity_no: r.optional(IDENTITY_NO),
            modified_at: r.optional_timestamp(MODIFIED_AT)?,
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct LinkmanRecord {
    pub customer_ref: String,
    pub linkman_id: String,
    pub name: Option<String>,
    pub relation: Option<String>,
    pub modified_at: Option<DateTime<Utc>>,
}

impl LinkmanRecord {
    pub fn parse(record: &RawRecord) -> Result<Self, RecordError> {
        let mut r = FieldReader::new(record);
        let customer_ref = r.required(CUSTOMER_REF);
        let linkman_id = r.required(LINKMAN_ID);
        r.finish()?;
        let r = FieldReader::new(record);
        Ok(Self {
            customer_ref: normalize_key(&customer_ref),
            linkman_id: normalize_key(&linkman_id),
            name: r.optional(LINKMAN_NAME),
            relation: r.optional(RELATION),
            modified_at: r.optional_timestamp(LINKMAN_MODIFIED_AT)?,
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct GpsRecord {
    pub customer_ref: String,
    pub latitude: f64,
    pub longitude: f64,
    pub timestamp: DateTime<Utc>,
    pub geo_code: Option<String>,
}

impl GpsRecord {
    pub fn parse(record: &RawRecord) -> Result<Self, RecordError> {
        let mut r = FieldReader::new(record);
        let customer_ref = r.required(CUSTOMER_REF);
        let lat = r.required_scalar(LATITUDE);
        let lng = r.required_scalar(LONGITUDE);
        let ts = r.required_scalar(GPS_TIME);
        let geo_code = r.optional(GEO_CODE);
        r.finish()?;

        let (Some(lat), Some(lng), Some(ts)) = (lat, lng, ts) else {
            return Err(RecordError::validation([LATITUDE[0], LONGITUDE[0], GPS_TIME[0]]));
        };
        Ok(Self {
            customer_ref: normalize_key(&customer_ref),
            latitude: parse_coordinate(LATITUDE, lat, 90.0)?,
            longitude: parse_coordinate(LONGITUDE, lng, 180.0)?,
            timestamp: parse_timestamp(ts).ok_or_else(|| unparsable(GPS_TIME, ts))?,
            geo_code: geo_code.map(|g| normalize_key(&g)),
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct OrderRecord {
    pub order_id: String,
    pub customer_ref: String,
    pub status: Option<String>,
    pub applied_at: Option<DateTime<Utc>>,
    pub signed_at: Option<DateTime<Utc>>,
    pub phone: Option<String>,
    pub identity_no: Option<String>,
    pub card_no: Option<String>,
    pub repay_card_no: Option<String>,
    pub card_phone: Option<String>,
    pub repay_card_phone: Option<String>,
}

impl OrderRecord {
    pub fn parse(record: &RawRecord) -> Result<Self, RecordError> {
        let mut r = FieldReader::new(record);
        let order_id = r.required(ORDER_ID);
        let customer_ref = r.required(ORDER_CUSTOMER_REF);
        r.finish()?;
        let r = FieldReader::new(record);
        Ok(Self {
            // Order ids keep their case.
            order_id,
            customer_ref: normalize_key(&customer_ref),
            status: r.optional(ORDER_STATUS),
            applied_at: r.optional_timestamp(APPLIED_AT)?,
            signed_at: r.optional_timestamp(SIGNED_AT)?,
            phone: r.optional(APPLY_PHONE),
            identity_no: r.optional(APPLY_IDENTITY_NO),
            card_no: r.optional(CARD_NO),
            repay_card_no: r.optional(REPAY_CARD_NO),
            card_phone: r.optional(CARD_PHONE),
            repay_card_phone: r.optional(REPAY_CARD_PHONE),
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct BlacklistRecord {
    pub reason: String,
    /// Customer subject first, then account.
    pub subjects: Vec<NodeKey>,
    pub entry_id: Option<String>,
    pub listed_at: Option<DateTime<Utc>>,
}

impl BlacklistRecord {
    pub fn parse(record: &RawRecord) -> Result<Self, RecordError> {
        let mut r = FieldReader::new(record);
        let reason = r.required(REASON);
        let customer = r.optional(SUBJECT_CUSTOMER);
        let account = r.optional(SUBJECT_ACCOUNT);
        if customer.is_none() && account.is_none() {
            r.missing.push(format!("{}|{}", SUBJECT_CUSTOMER[0], SUBJECT_ACCOUNT[0]));
        }
        r.finish()?;
        let r = FieldReader::new(record);

        let subjects = customer
            .map(|c| NodeKey::new(EntityType::Customer, normalize_key(&c)))
            .into_iter()
            .chain(account.map(|a| NodeKey::new(EntityType::Account, normalize_key(&a))))
            .collect();

        Ok(Self {
            reason,
            subjects,
            entry_id: r.optional(ENTRY_ID).map(|e| normalize_key(&e)),
            listed_at: r.optional_timestamp(LISTED_AT)?,
        })
    }

    /// Explicit entry id, or derived from the first subject and the reason.
    pub fn entry_key(&self) -> String {
        if let Some(id) = &self.entry_id {
            return id.clone();
        }
        match self.subjects.first() {
            Some(subject) => normalize_key(&format!(
                "{}:{}:{}",
                subject.label(),
                subject.key,
                self.reason
            )),
            None => normalize_key(&self.reason),
        }
    }
}

// ── Mappers ──────────────────────────────────────────────────────

/// Dispatch to the mapper for `entity`.
pub fn map_record(
    entity: EntityType,
    record: &RawRecord,
) -> Result<MutationDescriptor, RecordError> {
    match entity {
        EntityType::Account => map_account(record),
        EntityType::Customer => map_customer(record),
        EntityType::Linkman => map_linkman(record),
        EntityType::GpsEvent => map_gps_event(record),
        EntityType::Order => map_order(record),
        EntityType::BlacklistEntry => map_blacklist_entry(record),
    }
}

pub fn map_account(record: &RawRecord) -> Result<MutationDescriptor, RecordError> {
    let a = AccountRecord::parse(record)?;
    let node = NodeUpsert::new(NodeKey::new(EntityType::Account, &a.login))
        .prop("phone", a.phone)
        .prop("device_no", a.device_no)
        .prop("td_device_id", a.td_device_id)
        .prop("remote_ip", a.remote_ip)
        .prop("login_time", a.login_time);
    Ok(MutationDescriptor::default().node(node))
}

pub fn map_customer(record: &RawRecord) -> Result<MutationDescriptor, RecordError> {
    let c = CustomerRecord::parse(record)?;
    let key = NodeKey::new(EntityType::Customer, &c.customer_id);
    let node = NodeUpsert::new(key.clone())
        .prop("phone", c.phone)
        .prop("identity_no", c.identity_no)
        .prop("modified_at", c.modified_at);

    let mut descriptor = MutationDescriptor::default().node(node);
    if let Some(account) = c.account_ref {
        descriptor = descriptor.edge(EdgeUpsert::new(
            NodeKey::new(EntityType::Account, account),
            key,
            RelType::Owns,
        ));
    }
    Ok(descriptor)
}

pub fn map_linkman(record: &RawRecord) -> Result<MutationDescriptor, RecordError> {
    let l = LinkmanRecord::parse(record)?;
    let key = NodeKey::new(EntityType::Linkman, &l.linkman_id);
    let node = NodeUpsert::new(key.clone()).prop("name", l.name);
    let edge = EdgeUpsert::new(NodeKey::new(EntityType::Customer, &l.customer_ref), key, RelType::Contacts)
        .prop("relation", l.relation)
        .prop("modified_at", l.modified_at);
    Ok(MutationDescriptor::default().node(node).edge(edge))
}

pub fn map_gps_event(record: &RawRecord) -> Result<MutationDescriptor, RecordError> {
    let g = GpsRecord::parse(record)?;
    let key = NodeKey::new(
        EntityType::GpsEvent,
        format!("{}@{}", g.customer_ref, g.timestamp.to_rfc3339()),
    );
    let node = NodeUpsert::new(key.clone())
        .prop("latitude", Some(g.latitude))
        .prop("longitude", Some(g.longitude))
        .prop("timestamp", Some(g.timestamp))
        .prop("geo_code", g.geo_code);
    let edge = EdgeUpsert::new(
        NodeKey::new(EntityType::Customer, &g.customer_ref),
        key,
        RelType::LocatedAt,
    );
    Ok(MutationDescriptor::default().node(node).edge(edge))
}

pub fn map_order(record: &RawRecord) -> Result<MutationDescriptor, RecordError> {
    let o = OrderRecord::parse(record)?;
    let key = NodeKey::new(EntityType::Order, &o.order_id);
    let node = NodeUpsert::new(key.clone())
        .prop("status", o.status)
        .prop("applied_at", o.applied_at)
        .prop("signed_at", o.signed_at)
        .prop("phone", o.phone)
        .prop("identity_no", o.identity_no)
        .prop("card_no", o.card_no)
        .prop("repay_card_no", o.repay_card_no)
        .prop("card_phone", o.card_phone)
        .prop("repay_card_phone", o.repay_card_phone);
    let edge = EdgeUpsert::new(
        NodeKey::new(EntityType::Customer, &o.customer_ref),
        key,
        RelType::Placed,
    )
    .prop("applied_at", o.applied_at);
    Ok(MutationDescriptor::default().node(node).edge(edge))
}

pub fn map_blacklist_entry(record: &RawRecord) -> Result<MutationDescriptor, RecordError> {
    let b = BlacklistRecord::parse(record)?;
    let key = NodeKey::new(EntityType::BlacklistEntry, b.entry_key());
    let node = NodeUpsert::new(key.clone())
        .prop("reason", Some(b.reason.clone()))
        .prop("listed_at", b.listed_at);

    let mut descriptor = MutationDescriptor::default().node(node);
    for subject in b.subjects {
        descriptor = descriptor.edge(
            EdgeUpsert::new(subject, key.clone(), RelType::Flagged)
                .prop("reason", Some(b.reason.clone())),
        );
    }
    Ok(descriptor)
}
