use anyhow::Result;
use tracing_subscriber::EnvFilter;

use jitql::config::{Config, ResultMode};
use jitql::database::Database;
use jitql::datum::Datum;
use jitql::expr::Expression;
use jitql::logical_algebra::{Aggregator, JoinMethod, LogicalPlan};
use jitql::query_context::QueryContext;
use jitql::sql_type::SqlType;
use jitql::sql_value::ComparisonMode;

fn demo_database() -> Result<Database> {
    let mut db = Database::new();
    db.create_table("customers", &[("id", SqlType::integer()), ("name", SqlType::varchar(20))])?;
    db.create_table(
        "orders",
        &[
            ("id", SqlType::integer()),
            ("customer", SqlType::integer()),
            ("amount", SqlType::numeric(10, 2).as_nullable()),
        ],
    )?;
    db.insert_rows(
        "customers",
        &[
            vec![Datum::Integer(1), Datum::Varchar("ada".to_string())],
            vec![Datum::Integer(2), Datum::Varchar("brian".to_string())],
        ],
    )?;
    db.insert_rows(
        "orders",
        &[
            vec![Datum::Integer(10), Datum::Integer(1), Datum::Numeric(1250, 2)],
            vec![Datum::Integer(11), Datum::Integer(1), Datum::Numeric(300, 2)],
            vec![Datum::Integer(12), Datum::Integer(2), Datum::Null],
            vec![Datum::Integer(13), Datum::Integer(2), Datum::Numeric(999, 2)],
        ],
    )?;
    Ok(db)
}

// SELECT c.name, sum(o.amount), count(*) FROM customers c, orders o WHERE c.id = o.customer GROUP BY c.name
fn totals_per_customer(db: &mut Database, config: &Config) -> Result<()> {
    let query = {
        let mut ctx = QueryContext::new(db, config)?;
        let mut plan = LogicalPlan::new();
        let c = ctx.scan(&mut plan, "customers", "c")?;
        let o = ctx.scan(&mut plan, "orders", "o")?;
        let on = Expression::equal(ctx.column("c.id")?, ctx.column("o.customer")?)?;
        let join = plan.join(c, o, on, JoinMethod::Hash)?;
        let name = ctx.iu("c.name")?;
        let amount = ctx.column("o.amount")?;
        let sum = Aggregator::sum(ctx.ius(), amount)?;
        let count = Aggregator::count_all(ctx.ius());
        let selection = vec![name, sum.iu(), count.iu()];
        let group = plan.group_by(join, vec![Aggregator::keep(name), sum, count])?;
        plan.result(group, selection)?;
        println!("{}", plan.explain(ctx.iu_factory()));
        jitql::compile_query(&ctx, &plan, config)?
    };
    let outcome = query.execute(db)?;
    print!("{}", outcome.output);
    Ok(())
}

// UPDATE orders SET amount = amount * 2 WHERE amount < 10.00
fn double_small_orders(db: &mut Database, config: &Config) -> Result<()> {
    let query = {
        let mut ctx = QueryContext::new(db, config)?;
        let mut plan = LogicalPlan::new();
        let o = ctx.scan(&mut plan, "orders", "o")?;
        let small = Expression::compare(
            ComparisonMode::Less,
            ctx.column("o.amount")?,
            Expression::constant(Datum::Numeric(1000, 2)),
        )?;
        let filtered = plan.select(o, small)?;
        let doubled = Expression::mul(ctx.column("o.amount")?, Expression::constant(Datum::Integer(2)))?;
        ctx.update(&mut plan, filtered, "o", vec![("amount", doubled)])?;
        jitql::compile_query(&ctx, &plan, config)?
    };
    print!("{}", query.execute(db)?.output);
    Ok(())
}

// DELETE FROM orders WHERE customer = 2
fn delete_orders_of_second_customer(db: &mut Database, config: &Config) -> Result<()> {
    let query = {
        let mut ctx = QueryContext::new(db, config)?;
        let mut plan = LogicalPlan::new();
        let o = ctx.scan(&mut plan, "orders", "o")?;
        let second = Expression::equal(ctx.column("o.customer")?, Expression::constant(Datum::Integer(2)))?;
        let filtered = plan.select(o, second)?;
        ctx.delete(&mut plan, filtered, "o")?;
        jitql::compile_query(&ctx, &plan, config)?
    };
    print!("{}", query.execute(db)?.output);
    Ok(())
}

fn show_orders(db: &mut Database, config: &Config) -> Result<()> {
    let config = config.clone().result_mode(ResultMode::Collect);
    let query = {
        let mut ctx = QueryContext::new(db, &config)?;
        let mut plan = LogicalPlan::new();
        let o = ctx.scan(&mut plan, "orders", "o")?;
        let selection = vec![ctx.iu("o.id")?, ctx.iu("o.customer")?, ctx.iu("o.amount")?];
        plan.result(o, selection)?;
        jitql::compile_query(&ctx, &plan, &config)?
    };
    let outcome = query.execute(db)?;
    jitql::formatting::print_rows(&["id", "customer", "amount"], &outcome.rows, true);
    Ok(())
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();
    let mut db = demo_database()?;
    let master = Config::from_env()?;
    println!("Customers:");
    jitql::formatting::print_table(db.table("customers")?, master.branch);
    println!("-----");
    totals_per_customer(&mut db, &master)?;
    println!("-----");
    double_small_orders(&mut db, &master)?;
    let dev = db.create_branch("dev", "master")?;
    let dev = master.clone().branch(dev);
    delete_orders_of_second_customer(&mut db, &dev)?;
    println!("Orders in dev:");
    show_orders(&mut db, &dev)?;
    println!("Orders in master:");
    show_orders(&mut db, &master)?;
    println!("Orders in dev, as stored:");
    jitql::formatting::print_table(db.table("orders")?, dev.branch);
    Ok(())
}
