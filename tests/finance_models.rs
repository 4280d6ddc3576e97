use anyhow::Result;
use chrono::NaiveDate;
use fingame_store::{
    record, storage_enum, Connection, Entity, EntityDef, EntityRecord, Error, FieldType,
    FieldValue, Filter, Kernel, SchemaRegistry, StorageEnum, Store, Value,
};
use tempfile::TempDir;

storage_enum! {
    /// Types of bank objects
    pub enum TypeOfBank {
        Bank = "BANK",
    }
}

storage_enum! {
    pub enum TypeOfAccount {
        /// Credit card
        Credit = "CRED",
        Checking = "CHCK",
        Savings = "SAVE",
        MoneyMarket = "MONM",
        Brokerage = "BROK",
    }
}

storage_enum! {
    pub enum AccountPurpose {
        Emergency = "MRGC",
        Sinking = "SINK",
        SelfDevelopment = "NYOU",
        Budget = "BUDG",
        Retirement = "RTIR",
        Investment = "NVST",
    }
}

#[derive(Debug, Clone, PartialEq)]
struct User {
    id: Option<i64>,
    name: String,
    email: String,
    password_hash: String,
    sponsor_id: Option<i64>,
}

impl Entity for User {
    fn definition() -> fingame_store::Result<EntityDef> {
        EntityDef::builder("User")
            .field("id", FieldType::identifier())
            .field("name", FieldType::string(50).not_null())
            .field("email", FieldType::string(50).not_null())
            .field("password_hash", FieldType::string(64).not_null())
            .field("sponsor_id", FieldType::foreign_key("User"))
            .build()
    }

    fn from_record(record: &EntityRecord) -> fingame_store::Result<Self> {
        Ok(Self {
            id: record.get("id")?,
            name: record.get("name")?,
            email: record.get("email")?,
            password_hash: record.get("password_hash")?,
            sponsor_id: record.get("sponsor_id")?,
        })
    }

    fn to_record(&self) -> EntityRecord {
        EntityRecord::new()
            .with("id", self.id)
            .with("name", self.name.as_str())
            .with("email", self.email.as_str())
            .with("password_hash", self.password_hash.as_str())
            .with("sponsor_id", self.sponsor_id)
    }
}

#[derive(Debug, Clone, PartialEq)]
struct Bank {
    id: Option<i64>,
    name: String,
    kind: TypeOfBank,
    url: Option<String>,
}

impl Entity for Bank {
    fn definition() -> fingame_store::Result<EntityDef> {
        EntityDef::builder("Bank")
            .field("id", FieldType::identifier())
            .field("name", FieldType::string(50).not_null())
            .field("type", FieldType::enumeration::<TypeOfBank>().not_null())
            .field("url", FieldType::string(2083))
            .build()
    }

    fn from_record(record: &EntityRecord) -> fingame_store::Result<Self> {
        Ok(Self {
            id: record.get("id")?,
            name: record.get("name")?,
            kind: required(record.get_enum("type")?, "type")?,
            url: record.get("url")?,
        })
    }

    fn to_record(&self) -> EntityRecord {
        EntityRecord::new()
            .with("id", self.id)
            .with("name", self.name.as_str())
            .with("type", FieldValue::from_enum(self.kind))
            .with("url", self.url.clone())
    }
}

#[derive(Debug, Clone, PartialEq)]
struct AccountType {
    id: Option<i64>,
    name: String,
    kind: TypeOfAccount,
    url: Option<String>,
    bank_id: i64,
}

impl Entity for AccountType {
    fn definition() -> fingame_store::Result<EntityDef> {
        EntityDef::builder("AccountType")
            .field("id", FieldType::identifier())
            .field("name", FieldType::string(50).not_null())
            .field("type", FieldType::enumeration::<TypeOfAccount>().not_null())
            .field("url", FieldType::string(2083))
            .field("bank_id", FieldType::foreign_key("Bank").not_null())
            .build()
    }

    fn from_record(record: &EntityRecord) -> fingame_store::Result<Self> {
        Ok(Self {
            id: record.get("id")?,
            name: record.get("name")?,
            kind: required(record.get_enum("type")?, "type")?,
            url: record.get("url")?,
            bank_id: record.get("bank_id")?,
        })
    }

    fn to_record(&self) -> EntityRecord {
        EntityRecord::new()
            .with("id", self.id)
            .with("name", self.name.as_str())
            .with("type", FieldValue::from_enum(self.kind))
            .with("url", self.url.clone())
            .with("bank_id", self.bank_id)
    }
}

#[derive(Debug, Clone, PartialEq)]
struct Account {
    id: Option<i64>,
    label: String,
    hint: Option<String>,
    purpose: Option<AccountPurpose>,
    account_type_id: i64,
    user_id: i64,
}

impl Entity for Account {
    fn definition() -> fingame_store::Result<EntityDef> {
        EntityDef::builder("Account")
            .field("id", FieldType::identifier())
            .field("label", FieldType::string(50).not_null())
            .field("hint", FieldType::string(128))
            .field("purpose", FieldType::enumeration::<AccountPurpose>())
            .field("account_type_id", FieldType::foreign_key("AccountType").not_null())
            .field("user_id", FieldType::foreign_key("User").not_null())
            .build()
    }

    fn from_record(record: &EntityRecord) -> fingame_store::Result<Self> {
        Ok(Self {
            id: record.get("id")?,
            label: record.get("label")?,
            hint: record.get("hint")?,
            purpose: record.get_enum("purpose")?,
            account_type_id: record.get("account_type_id")?,
            user_id: record.get("user_id")?,
        })
    }

    fn to_record(&self) -> EntityRecord {
        EntityRecord::new()
            .with("id", self.id)
            .with("label", self.label.as_str())
            .with("hint", self.hint.clone())
            .with("purpose", self.purpose.map(FieldValue::from_enum))
            .with("account_type_id", self.account_type_id)
            .with("user_id", self.user_id)
    }
}

#[derive(Debug, Clone, PartialEq)]
struct Statement {
    id: Option<i64>,
    account_id: i64,
    start_date: NaiveDate,
    end_date: NaiveDate,
    start_value: f64,
    end_value: f64,
    withdrawals: f64,
    deposits: f64,
    interest: f64,
    fees: f64,
    rate: f64,
    mileage: Option<i64>,
}

const MONEY_FIELDS: [&str; 6] = [
    "start_value",
    "end_value",
    "withdrawals",
    "deposits",
    "interest",
    "fees",
];

impl Entity for Statement {
    fn definition() -> fingame_store::Result<EntityDef> {
        let mut def = EntityDef::builder("Statement")
            .field("id", FieldType::identifier())
            .field("account_id", FieldType::foreign_key("Account").not_null())
            .field("start_date", FieldType::date().not_null())
            .field("end_date", FieldType::date().not_null());
        for name in MONEY_FIELDS {
            def = def.field(name, FieldType::money().not_null());
        }
        def.field("rate", FieldType::fixed(2).not_null())
            .field("mileage", FieldType::integer())
            .build()
    }

    fn from_record(record: &EntityRecord) -> fingame_store::Result<Self> {
        Ok(Self {
            id: record.get("id")?,
            account_id: record.get("account_id")?,
            start_date: record.get("start_date")?,
            end_date: record.get("end_date")?,
            start_value: record.get("start_value")?,
            end_value: record.get("end_value")?,
            withdrawals: record.get("withdrawals")?,
            deposits: record.get("deposits")?,
            interest: record.get("interest")?,
            fees: record.get("fees")?,
            rate: record.get("rate")?,
            mileage: record.get("mileage")?,
        })
    }

    fn to_record(&self) -> EntityRecord {
        EntityRecord::new()
            .with("id", self.id)
            .with("account_id", self.account_id)
            .with("start_date", self.start_date)
            .with("end_date", self.end_date)
            .with("start_value", self.start_value)
            .with("end_value", self.end_value)
            .with("withdrawals", self.withdrawals)
            .with("deposits", self.deposits)
            .with("interest", self.interest)
            .with("fees", self.fees)
            .with("rate", self.rate)
            .with("mileage", self.mileage)
    }
}

fn required<T>(value: Option<T>, field: &str) -> fingame_store::Result<T> {
    value.ok_or_else(|| Error::Schema(format!("{field} must not be null")))
}

fn registry() -> Result<SchemaRegistry> {
    Ok(SchemaRegistry::new()
        .with::<User>()?
        .with::<Bank>()?
        .with::<AccountType>()?
        .with::<Account>()?
        .with::<Statement>()?)
}

fn day(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).expect("valid date")
}

fn user(name: &str, email: &str, sponsor_id: Option<i64>) -> User {
    User {
        id: None,
        name: name.to_string(),
        email: email.to_string(),
        password_hash: "0".repeat(64),
        sponsor_id,
    }
}

struct Fixture {
    john: User,
    jane: User,
    account: Account,
    statement: Statement,
}

fn populate<X: fingame_store::Executor>(store: &Store<X>) -> Result<Fixture> {
    let john = store.insert(&user("John", "john@apple.com", None))?;
    let jane = store.insert(&user("Jane", "jane@apple.com", john.id))?;
    let bank = store.insert(&Bank {
        id: None,
        name: "Hometown Credit Union".to_string(),
        kind: TypeOfBank::Bank,
        url: None,
    })?;
    let checking = store.insert(&AccountType {
        id: None,
        name: "Free Checking".to_string(),
        kind: TypeOfAccount::Checking,
        url: Some("https://example.com/checking".to_string()),
        bank_id: bank.id.expect("bank id"),
    })?;
    let account = store.insert(&Account {
        id: None,
        label: "Bills".to_string(),
        hint: None,
        purpose: Some(AccountPurpose::Budget),
        account_type_id: checking.id.expect("account type id"),
        user_id: jane.id.expect("jane id"),
    })?;
    let statement = store.insert(&Statement {
        id: None,
        account_id: account.id.expect("account id"),
        start_date: day(2021, 1, 1),
        end_date: day(2021, 1, 31),
        start_value: 100.0,
        end_value: 135.44,
        withdrawals: 10.0,
        deposits: 42.3,
        interest: 3.14,
        fees: 0.0,
        rate: 0.5,
        mileage: None,
    })?;
    Ok(Fixture {
        john,
        jane,
        account,
        statement,
    })
}

fn open(dir: &TempDir) -> Result<Store> {
    let locator = format!(
        "sqlite:///{}?threadsafe=true",
        dir.path().join("game.sqlite3").display()
    );
    Ok(Store::open(&locator, registry()?)?)
}

#[test]
fn schema_matches_field_declarations() -> Result<()> {
    let description = registry()?.database_description();
    let bank = &description["Bank"];
    assert_eq!(bank.get("type"), Some("VARCHAR(4) NOT NULL"));
    assert_eq!(bank.get("url"), Some("VARCHAR(2083)"));
    let account = &description["Account"];
    assert_eq!(account.get("purpose"), Some("VARCHAR(4)"));
    assert_eq!(account.get("user_id"), Some("INTEGER NOT NULL"));
    let statement = &description["Statement"];
    assert_eq!(statement.get("start_date"), Some("VARCHAR(10) NOT NULL"));
    assert_eq!(statement.get("interest"), Some("INTEGER NOT NULL"));
    assert_eq!(TypeOfAccount::NAMES.len(), 5);
    assert_eq!(AccountPurpose::from_name("RTIR"), Some(AccountPurpose::Retirement));
    Ok(())
}

#[test]
fn entities_round_trip_through_a_file() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let fixture = {
        let store = open(&dir)?;
        let fixture = populate(&store)?;
        store.close()?;
        fixture
    };

    let store = open(&dir)?;
    assert_eq!(store.count::<User>(None)?, 2);
    assert_eq!(store.fetch::<User>(fixture.john.id.expect("id"))?, Some(fixture.john.clone()));
    assert_eq!(
        store.find::<User>(&Filter::new("email LIKE :email").bind("email", "JANE@apple.com"))?,
        Some(fixture.jane.clone())
    );

    let sponsored = store.all::<User>(Some(
        &Filter::new("sponsor_id = :user_id").bind("user_id", fixture.john.id),
    ))?;
    assert_eq!(sponsored, vec![fixture.jane.clone()]);

    let account = store
        .fetch::<Account>(fixture.account.id.expect("id"))?
        .expect("account");
    assert_eq!(account.purpose, Some(AccountPurpose::Budget));

    let statement = store
        .fetch::<Statement>(fixture.statement.id.expect("id"))?
        .expect("statement");
    assert_eq!(statement.start_date, day(2021, 1, 1));
    assert!((statement.end_value - 135.44).abs() < 0.001);
    assert!((statement.interest - 3.14).abs() < 0.001);
    store.close()?;
    Ok(())
}

#[test]
fn money_is_stored_in_cents() -> Result<()> {
    let store = Store::bootstrap(Connection::new(Kernel::open_in_memory()?), registry()?)?;
    let fixture = populate(&store)?;
    let row = store
        .connection()
        .get_one_or_none(
            "Statement",
            &["interest", "end_value", "rate", "start_date"],
            Some(&Filter::new("id = :id").bind("id", fixture.statement.id)),
        )?
        .expect("statement row");
    assert_eq!(row.get("interest"), Some(&Value::Integer(314)));
    assert_eq!(row.get("end_value"), Some(&Value::Integer(13544)));
    assert_eq!(row.get("rate"), Some(&Value::Integer(50)));
    assert_eq!(row.get("start_date"), Some(&Value::from("2021-01-01 00:00:00.000")));
    Ok(())
}

#[test]
fn change_updates_selected_fields() -> Result<()> {
    let store = Store::bootstrap(Connection::new(Kernel::open_in_memory()?), registry()?)?;
    let fixture = populate(&store)?;
    let id = fixture.account.id.expect("id");

    store.change::<Account>(
        id,
        &[
            ("hint", "pay the rent".into()),
            ("purpose", FieldValue::from_enum(AccountPurpose::Emergency)),
        ],
    )?;
    let account = store.fetch::<Account>(id)?.expect("account");
    assert_eq!(account.hint.as_deref(), Some("pay the rent"));
    assert_eq!(account.purpose, Some(AccountPurpose::Emergency));
    assert_eq!(account.label, fixture.account.label);

    let err = store
        .change::<Account>(id, &[("purpose", "PLAY".into())])
        .expect_err("not an AccountPurpose");
    assert!(matches!(err, Error::InvalidEnumValue { enum_name: "AccountPurpose", .. }));
    Ok(())
}

#[test]
fn unknown_enum_name_in_storage_is_rejected() -> Result<()> {
    let store = Store::bootstrap(Connection::new(Kernel::open_in_memory()?), registry()?)?;
    store
        .connection()
        .insert("Bank", &record! { "name" => "Odd", "type" => "CASINO" })?;
    let err = store.all::<Bank>(None).expect_err("CASINO is not a TypeOfBank");
    assert!(matches!(
        err,
        Error::InvalidEnumValue { enum_name: "TypeOfBank", ref value } if value == "CASINO"
    ));
    Ok(())
}

#[test]
fn snapshot_restores_into_an_empty_database() -> Result<()> {
    let source = Store::bootstrap(Connection::new(Kernel::open_in_memory()?), registry()?)?;
    let fixture = populate(&source)?;
    // leave a gap in the user ids so remapping is observable
    source.delete::<User>(&Filter::new("id = :id").bind("id", fixture.john.id))?;
    let jane_old = fixture.jane.id.expect("id");
    source.change::<User>(jane_old, &[("sponsor_id", FieldValue::Null)])?;

    let snapshot = source.snapshot()?;
    assert_eq!(snapshot.table("User").map(|t| t.len()), Some(1));

    let target = Store::bootstrap(Connection::new(Kernel::open_in_memory()?), registry()?)?;
    let ids = target.restore(&snapshot)?;
    let jane_new = ids.get("User", jane_old).expect("jane was restored");
    assert_eq!(jane_new, 1);

    let account = target
        .fetch::<Account>(ids.get("Account", fixture.account.id.expect("id")).expect("mapped"))?
        .expect("account restored");
    assert_eq!(account.user_id, jane_new);
    assert_eq!(
        target.count::<Statement>(None)?,
        source.count::<Statement>(None)?
    );

    let again = target.restore(&snapshot).expect_err("tables are no longer empty");
    assert!(matches!(again, Error::Snapshot(_)));
    Ok(())
}
