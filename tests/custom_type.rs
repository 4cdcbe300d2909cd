//! Round-tripping an application-defined type through the codec registry.

use std::time::Duration;

use mpc_comm_pool::codec::Options;
use mpc_comm_pool::error::{CommError, Result};
use mpc_comm_pool::pool::Pool;
use mpc_comm_pool::value::Value;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct Point {
    x: i64,
    y: i64,
}

fn install_point_codec(registry: &mut mpc_comm_pool::codec::CodecRegistry) {
    registry
        .register_type::<Point, _, _>(
            "point",
            |p: &Point, _: &Options| -> Result<Value> {
                Ok(Value::Map(vec![
                    (Value::Str("x".into()), Value::Int(p.x)),
                    (Value::Str("y".into()), Value::Int(p.y)),
                ]))
            },
            |v: Value, _: &Options| -> Result<Point> {
                let map = v.into_btree_map().ok_or_else(|| CommError::Malformed("point was not a map".into()))?;
                let x = match map.get("x") {
                    Some(Value::Int(n)) => *n,
                    _ => return Err(CommError::Malformed("point missing x".into())),
                };
                let y = match map.get("y") {
                    Some(Value::Int(n)) => *n,
                    _ => return Err(CommError::Malformed("point missing y".into())),
                };
                Ok(Point { x, y })
            },
            false,
        )
        .unwrap();
}

#[tokio::test]
async fn registered_type_round_trips_through_the_registry() {
    let pool = Pool::new(None, None, None, Duration::from_millis(1), 0);
    install_point_codec(&mut *pool.registry().await);

    let original = Point { x: 3, y: 4 };
    let wire = {
        let registry = pool.registry().await;
        registry.to_value(&original, &Options::default()).unwrap()
    };
    let (tag, _) = wire.as_tagged().unwrap();
    assert_eq!(tag, "point");

    let decoded: Point = {
        let registry = pool.registry().await;
        registry.from_value(wire, &Options::default()).unwrap()
    };
    assert_eq!(decoded, original);
}
