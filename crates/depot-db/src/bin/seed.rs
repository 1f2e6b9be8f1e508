//! # Seed Data Generator
//!
//! Populates a database with demo master data, sequences and opening stock.
//!
//! ## Usage
//! ```bash
//! # Seed ./depot_dev.db
//! cargo run -p depot-db --bin seed
//!
//! # Specify database path and sequence year
//! cargo run -p depot-db --bin seed -- --db ./data/depot.db --year 2025
//! ```
//!
//! ## Generated Data
//! - 3 branches (MAIN, NORTH, SOUTH)
//! - Building-materials catalog, each product with a minimum stock
//! - 4 customers, two with a credit limit
//! - Default sequences for every entity type in the chosen year
//! - Opening stock per branch, booked as `ADD` movements

use chrono::{Datelike, Utc};
use std::env;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use depot_core::money::Money;
use depot_core::sequence::{EntityType, SequenceConfig};
use depot_core::types::{Branch, Customer, Product};
use depot_db::{Database, DbConfig};

const BRANCHES: &[(&str, &str)] = &[
    ("MAIN", "Main Warehouse"),
    ("NORTH", "North Yard"),
    ("SOUTH", "South Depot"),
];

/// (code, name, unit, sale price, purchase price, minimum stock)
const PRODUCTS: &[(&str, &str, &str, i64, i64, i64)] = &[
    ("CEM-50", "Portland Cement 50kg", "bag", 900, 700, 40),
    ("STL-10", "Rebar 10mm", "bar", 1100, 850, 100),
    ("STL-12", "Rebar 12mm", "bar", 1500, 1150, 100),
    ("BRK-RED", "Red Brick", "piece", 45, 30, 2000),
    ("SND-WSH", "Washed Sand", "m3", 3500, 2600, 10),
    ("GRV-20", "Gravel 20mm", "m3", 4200, 3100, 10),
    ("PLY-18", "Plywood 18mm", "sheet", 5200, 4000, 25),
    ("PVC-110", "PVC Pipe 110mm", "piece", 2300, 1700, 30),
    ("TIL-6060", "Floor Tile 60x60", "m2", 1800, 1300, 50),
    ("PNT-WHT", "Wall Paint White 20L", "bucket", 6400, 4900, 12),
];

/// (code, name, credit limit)
const CUSTOMERS: &[(&str, &str, i64)] = &[
    ("C-001", "Nile Contracting", 5_000_000),
    ("C-002", "Delta Builders", 2_000_000),
    ("C-003", "Walk-in Customer", 0),
    ("C-004", "Sinai Renovations", 0),
];

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info,depot=debug,sqlx=warn"));
    tracing_subscriber::fmt().with_env_filter(filter).with_target(false).init();
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    init_tracing();

    let args: Vec<String> = env::args().collect();

    let mut db_path = String::from("./depot_dev.db");
    let mut year = Utc::now().year();

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--db" | "-d" => {
                if i + 1 < args.len() {
                    db_path = args[i + 1].clone();
                    i += 1;
                }
            }
            "--year" | "-y" => {
                if i + 1 < args.len() {
                    year = args[i + 1].parse().unwrap_or(year);
                    i += 1;
                }
            }
            "--help" | "-h" => {
                println!("Depot Seed Data Generator");
                println!();
                println!("Usage: seed [OPTIONS]");
                println!();
                println!("Options:");
                println!("  -d, --db <PATH>    Database file path (default: ./depot_dev.db)");
                println!("  -y, --year <YEAR>  Year of the default sequences (default: current)");
                println!("  -h, --help         Show this help message");
                return Ok(());
            }
            _ => {}
        }
        i += 1;
    }

    info!(db = %db_path, year, "Seeding database");

    let db = Database::new(DbConfig::new(&db_path)).await?;

    let existing = db.products().count().await?;
    if existing > 0 {
        warn!(existing, "Database already has products, skipping seed");
        println!("Delete the database file to regenerate.");
        return Ok(());
    }

    let now = Utc::now();

    let mut branches = Vec::new();
    for (code, name) in BRANCHES {
        branches.push(db.branches().insert(&Branch::new(*code, *name, now)).await?);
    }
    info!(count = branches.len(), "Branches created");

    let mut products = Vec::new();
    for (code, name, unit, sale, purchase, minimum) in PRODUCTS {
        let mut product = Product::new(*code, *name, *unit, Money::from_cents(*sale), now);
        product.purchase_price = Money::from_cents(*purchase);
        product.min_stock = *minimum;
        products.push(db.products().insert(&product).await?);
    }
    info!(count = products.len(), "Products created");

    for (code, name, limit) in CUSTOMERS {
        let mut customer = Customer::new(*code, *name, now);
        customer.credit_limit = Money::from_cents(*limit);
        db.customers().insert(&customer).await?;
    }
    info!(count = CUSTOMERS.len(), "Customers created");

    for entity in EntityType::ALL {
        db.sequences().ensure_configured(&SequenceConfig::default_for(entity, year)).await?;
    }
    info!(year, "Sequences configured");

    let stock = db.stock();
    let mut movements = 0;
    for (b, branch) in branches.iter().enumerate() {
        for (p, product) in products.iter().enumerate() {
            // Uneven quantities so some levels start low and some empty.
            let quantity = (product.min_stock * ((p + b) as i64 % 4)) / 2;
            if quantity == 0 {
                continue;
            }
            stock
                .receive(&product.id, &branch.id, quantity, Some("Opening stock".to_string()), "seed")
                .await?;
            movements += 1;
        }
    }

    let summary = stock.summary(None).await?;
    info!(
        movements,
        total_quantity = summary.total_quantity,
        stock_value = %summary.stock_value,
        low_stock = summary.low_stock_count,
        "Opening stock booked"
    );

    println!("Seed complete: {}", db_path);
    Ok(())
}
