use jitql::config::{Config, ResultMode};
use jitql::database::Database;
use jitql::datum::Datum;
use jitql::expr::Expression;
use jitql::logical_algebra::{self, Aggregator, JoinMethod, LogicalPlan, Mapping};
use jitql::query_context::QueryContext;
use jitql::runtime::QueryOutcome;
use jitql::sql_type::SqlType;
use jitql::sql_value::ComparisonMode;
use jitql::translation;
use jitql::typed_row::Row;

fn collect() -> Config {
    Config::default().result_mode(ResultMode::Collect)
}

fn kv_database() -> Database {
    let mut db = Database::new();
    db.create_table("t", &[("k", SqlType::integer()), ("v", SqlType::integer())])
        .unwrap();
    db.insert_rows(
        "t",
        &[
            vec![Datum::Integer(1), Datum::Integer(10)],
            vec![Datum::Integer(2), Datum::Integer(20)],
            vec![Datum::Integer(1), Datum::Integer(30)],
        ],
    )
    .unwrap();
    db
}

fn run<F>(db: &mut Database, config: &Config, build: F) -> anyhow::Result<QueryOutcome>
where
    F: FnOnce(&mut QueryContext, &mut LogicalPlan) -> anyhow::Result<()>,
{
    let query = {
        let mut ctx = QueryContext::new(db, config)?;
        let mut plan = LogicalPlan::new();
        build(&mut ctx, &mut plan)?;
        jitql::compile_query(&ctx, &plan, config)?
    };
    query.execute(db)
}

fn sorted_ints(rows: &[Row]) -> Vec<Vec<i32>> {
    let mut out: Vec<Vec<i32>> = rows
        .iter()
        .map(|r| r.items.iter().map(|d| *d.as_integer().unwrap()).collect())
        .collect();
    out.sort();
    out
}

fn scan_all(db: &mut Database, config: &Config) -> Vec<Vec<i32>> {
    let outcome = run(db, &config.clone().result_mode(ResultMode::Collect), |ctx, plan| {
        let t = ctx.scan(plan, "t", "t")?;
        plan.result(t, vec![ctx.iu("t.k")?, ctx.iu("t.v")?])?;
        Ok(())
    })
    .unwrap();
    sorted_ints(&outcome.rows)
}

#[test]
fn test_group_by_sums_per_key() {
    let mut db = kv_database();
    let outcome = run(&mut db, &collect(), |ctx, plan| {
        let t = ctx.scan(plan, "t", "t")?;
        let k = ctx.iu("t.k")?;
        let v = ctx.column("t.v")?;
        let sum = Aggregator::sum(ctx.ius(), v)?;
        let selection = vec![k, sum.iu()];
        let g = plan.group_by(t, vec![Aggregator::keep(k), sum])?;
        plan.result(g, selection)?;
        Ok(())
    })
    .unwrap();
    assert_eq!(sorted_ints(&outcome.rows), vec![vec![1, 40], vec![2, 20]]);
}

#[test]
fn test_group_by_avg_and_min() {
    let mut db = Database::new();
    db.create_table("m", &[("v", SqlType::integer().as_nullable())]).unwrap();
    db.insert_rows("m", &[vec![Datum::Null], vec![Datum::Integer(7)], vec![Datum::Integer(3)]])
        .unwrap();
    let outcome = run(&mut db, &collect(), |ctx, plan| {
        let m = ctx.scan(plan, "m", "m")?;
        let v = ctx.column("m.v")?;
        let min = Aggregator::min(ctx.ius(), v)?;
        let count = Aggregator::count_all(ctx.ius());
        let selection = vec![min.iu(), count.iu()];
        let g = plan.group_by(m, vec![min, count])?;
        plan.result(g, selection)?;
        Ok(())
    })
    .unwrap();
    assert_eq!(outcome.rows, vec![Row::new(vec![Datum::Integer(3), Datum::Integer(3)])]);

    let mut db = kv_database();
    let outcome = run(&mut db, &collect(), |ctx, plan| {
        let t = ctx.scan(plan, "t", "t")?;
        let k = ctx.iu("t.k")?;
        let v = ctx.column("t.v")?;
        let avg = Aggregator::avg(ctx.ius(), v)?;
        let selection = vec![k, avg.iu()];
        let g = plan.group_by(t, vec![Aggregator::keep(k), avg])?;
        plan.result(g, selection)?;
        Ok(())
    })
    .unwrap();
    let mut rows = outcome.rows;
    rows.sort_by_key(|r| *r.items[0].as_integer().unwrap());
    assert_eq!(
        rows,
        vec![
            Row::new(vec![Datum::Integer(1), Datum::Numeric(2000, 2)]),
            Row::new(vec![Datum::Integer(2), Datum::Numeric(2000, 2)]),
        ]
    );
}

#[test]
fn test_count_of_empty_input_has_no_rows() {
    let mut db = Database::new();
    db.create_table("e", &[("a", SqlType::integer())]).unwrap();
    let build = |ctx: &mut QueryContext, plan: &mut LogicalPlan| -> anyhow::Result<()> {
        let e = ctx.scan(plan, "e", "e")?;
        let count = Aggregator::count_all(ctx.ius());
        let selection = vec![count.iu()];
        let g = plan.group_by(e, vec![count])?;
        plan.result(g, selection)?;
        Ok(())
    };
    let outcome = run(&mut db, &collect(), build).unwrap();
    assert!(outcome.rows.is_empty());
    let outcome = run(&mut db, &Config::default(), build).unwrap();
    assert_eq!(outcome.output, "Empty result set\n");
}

#[test]
fn test_group_by_many_groups_grows_the_table() {
    let mut db = Database::new();
    db.create_table("g", &[("k", SqlType::integer())]).unwrap();
    let rows: Vec<Vec<Datum>> = (0..5000).map(|i| vec![Datum::Integer(i % 1500)]).collect();
    db.insert_rows("g", &rows).unwrap();
    let config = collect().hashtable_initial_buckets(16);
    let outcome = run(&mut db, &config, |ctx, plan| {
        let g = ctx.scan(plan, "g", "g")?;
        let k = ctx.iu("g.k")?;
        let count = Aggregator::count_all(ctx.ius());
        let selection = vec![k, count.iu()];
        let grouped = plan.group_by(g, vec![Aggregator::keep(k), count])?;
        plan.result(grouped, selection)?;
        Ok(())
    })
    .unwrap();
    let groups = sorted_ints(&outcome.rows);
    assert_eq!(groups.len(), 1500);
    assert_eq!(groups.iter().map(|r| r[1]).sum::<i32>(), 5000);
    assert_eq!(groups[0], vec![0, 4]);
    assert_eq!(groups[1499], vec![1499, 3]);
}

#[test]
fn test_hash_join_matches_equal_keys() {
    let mut db = Database::new();
    db.create_table("l", &[("k", SqlType::integer()), ("x", SqlType::varchar(4))])
        .unwrap();
    db.create_table("r", &[("k", SqlType::integer()), ("y", SqlType::varchar(4))])
        .unwrap();
    let s = |v: &str| Datum::Varchar(v.to_string());
    db.insert_rows(
        "l",
        &[
            vec![Datum::Integer(1), s("x")],
            vec![Datum::Integer(2), s("y")],
            vec![Datum::Integer(3), s("z")],
        ],
    )
    .unwrap();
    db.insert_rows(
        "r",
        &[
            vec![Datum::Integer(1), s("p")],
            vec![Datum::Integer(2), s("q")],
            vec![Datum::Integer(4), s("w")],
        ],
    )
    .unwrap();
    let outcome = run(&mut db, &collect(), |ctx, plan| {
        let l = ctx.scan(plan, "l", "l")?;
        let r = ctx.scan(plan, "r", "r")?;
        let on = Expression::equal(ctx.column("r.k")?, ctx.column("l.k")?)?;
        let j = plan.join(l, r, on, JoinMethod::Hash)?;
        plan.result(j, vec![ctx.iu("l.x")?, ctx.iu("r.y")?])?;
        Ok(())
    })
    .unwrap();
    let mut rows: Vec<String> = outcome.rows.iter().map(|r| r.to_string()).collect();
    rows.sort();
    assert_eq!(rows, vec!["x\tp".to_string(), "y\tq".to_string()]);
}

#[test]
fn test_overflow_sets_flag() {
    let mut db = Database::new();
    db.create_table("o", &[("a", SqlType::integer())]).unwrap();
    db.insert_rows("o", &[vec![Datum::Integer(i32::MAX)]]).unwrap();
    let outcome = run(&mut db, &collect(), |ctx, plan| {
        let o = ctx.scan(plan, "o", "o")?;
        let next = Expression::add(ctx.column("o.a")?, Expression::constant(Datum::Integer(1)))?;
        let iu = ctx.value_iu("next", next.ty());
        let m = plan.map(o, vec![Mapping { iu, expression: next }])?;
        plan.result(m, vec![iu])?;
        Ok(())
    })
    .unwrap();
    assert!(outcome.overflow);
    assert!(!outcome.diagnostics.is_empty());
    assert_eq!(outcome.rows.len(), 1);
}

#[test]
fn test_filter_prints_matching_rows() {
    let mut db = kv_database();
    let outcome = run(&mut db, &Config::default(), |ctx, plan| {
        let t = ctx.scan(plan, "t", "t")?;
        let one = Expression::equal(ctx.column("t.k")?, Expression::constant(Datum::Integer(1)))?;
        let s = plan.select(t, one)?;
        plan.result(s, vec![ctx.iu("t.k")?, ctx.iu("t.v")?])?;
        Ok(())
    })
    .unwrap();
    assert_eq!(outcome.output, "1\t10\n1\t30\n2 tuples\n");
}

#[test]
fn test_result_rows_go_to_callback() {
    let mut db = kv_database();
    let config = collect();
    let query = {
        let mut ctx = QueryContext::new(&db, &config).unwrap();
        let mut plan = LogicalPlan::new();
        let t = ctx.scan(&mut plan, "t", "t").unwrap();
        let big = Expression::compare(
            ComparisonMode::Gtr,
            ctx.column("t.v").unwrap(),
            Expression::constant(Datum::Integer(15)),
        )
        .unwrap();
        let s = plan.select(t, big).unwrap();
        plan.result(s, vec![ctx.iu("t.v").unwrap()]).unwrap();
        jitql::compile_query(&ctx, &plan, &config).unwrap()
    };
    let mut seen = vec![];
    let mut callback = |row: &Row| seen.push(row.clone());
    let outcome = query.execute_with_callback(&mut db, &mut callback).unwrap();
    assert!(outcome.rows.is_empty());
    assert_eq!(
        seen,
        vec![Row::new(vec![Datum::Integer(20)]), Row::new(vec![Datum::Integer(30)])]
    );
}

#[test]
fn test_insert_update_and_delete() {
    let mut db = kv_database();
    let outcome = run(&mut db, &Config::default(), |ctx, plan| {
        ctx.insert(
            plan,
            "t",
            vec![Expression::constant(Datum::Integer(5)), Expression::constant(Datum::Integer(50))],
        )?;
        Ok(())
    })
    .unwrap();
    assert_eq!(outcome.output, "1 rows inserted\n");

    let outcome = run(&mut db, &Config::default(), |ctx, plan| {
        let t = ctx.scan(plan, "t", "t")?;
        let two = Expression::equal(ctx.column("t.k")?, Expression::constant(Datum::Integer(2)))?;
        let s = plan.select(t, two)?;
        let bumped = Expression::add(ctx.column("t.v")?, Expression::constant(Datum::Integer(1)))?;
        ctx.update(plan, s, "t", vec![("v", bumped)])?;
        Ok(())
    })
    .unwrap();
    assert_eq!(outcome.output, "1 rows updated\n");
    assert_eq!(
        scan_all(&mut db, &Config::default()),
        vec![vec![1, 10], vec![1, 30], vec![2, 21], vec![5, 50]]
    );

    let dev = db.create_branch("dev", "master").unwrap();
    let dev = Config::default().branch(dev);
    let outcome = run(&mut db, &dev, |ctx, plan| {
        let t = ctx.scan(plan, "t", "t")?;
        let one = Expression::equal(ctx.column("t.k")?, Expression::constant(Datum::Integer(1)))?;
        let s = plan.select(t, one)?;
        ctx.delete(plan, s, "t")?;
        Ok(())
    })
    .unwrap();
    assert_eq!(outcome.output, "2 rows deleted\n");
    assert_eq!(scan_all(&mut db, &dev), vec![vec![2, 21], vec![5, 50]]);
    assert_eq!(scan_all(&mut db, &Config::default()).len(), 4);
}

#[test]
fn test_missing_dependency_fails_compilation() {
    let mut db = kv_database();
    let err = run(&mut db, &collect(), |ctx, plan| {
        let a = ctx.scan(plan, "t", "a")?;
        ctx.scan(plan, "t", "b")?;
        plan.result(a, vec![ctx.iu("b.v")?])?;
        Ok(())
    })
    .unwrap_err();
    assert!(matches!(
        err.downcast_ref::<logical_algebra::Error>(),
        Some(logical_algebra::Error::UnsatisfiedDependency { .. })
    ));
}

#[test]
fn test_compiling_twice_reuses_iu_sets() {
    let db = kv_database();
    let config = collect();
    let mut ctx = QueryContext::new(&db, &config).unwrap();
    let mut plan = LogicalPlan::new();
    let t = ctx.scan(&mut plan, "t", "t").unwrap();
    let pred = Expression::compare(
        ComparisonMode::Leq,
        ctx.column("t.k").unwrap(),
        Expression::constant(Datum::Integer(1)),
    )
    .unwrap();
    let s = plan.select(t, pred).unwrap();
    plan.result(s, vec![ctx.iu("t.v").unwrap()]).unwrap();
    jitql::compile_query(&ctx, &plan, &config).unwrap();
    let computed = plan.computed_sets();
    assert!(computed > 0);
    jitql::compile_query(&ctx, &plan, &config).unwrap();
    assert_eq!(plan.computed_sets(), computed);
}

#[test]
fn test_unsupported_joins_fail_translation() {
    let mut db = kv_database();
    let join_with = |less: bool, method: JoinMethod| {
        move |ctx: &mut QueryContext, plan: &mut LogicalPlan| -> anyhow::Result<()> {
            let a = ctx.scan(plan, "t", "a")?;
            let b = ctx.scan(plan, "t", "b")?;
            let (l, r) = (ctx.column("a.k")?, ctx.column("b.k")?);
            let on = match less {
                true => Expression::compare(ComparisonMode::Less, l, r)?,
                false => Expression::equal(l, r)?,
            };
            let j = plan.join(a, b, on, method)?;
            plan.result(j, vec![ctx.iu("a.v")?])?;
            Ok(())
        }
    };
    let err = run(&mut db, &collect(), join_with(true, JoinMethod::Hash)).unwrap_err();
    assert!(matches!(
        err.downcast_ref::<translation::Error>(),
        Some(translation::Error::NonEquiJoin(_))
    ));
    let err = run(&mut db, &collect(), join_with(false, JoinMethod::Index)).unwrap_err();
    assert!(matches!(
        err.downcast_ref::<translation::Error>(),
        Some(translation::Error::UnsupportedJoinMethod(JoinMethod::Index))
    ));
    let outcome = run(&mut db, &collect(), join_with(false, JoinMethod::Hash)).unwrap();
    assert_eq!(outcome.rows.len(), 5);
}
