use std::time::Duration;

use serde_json::json;

use rpubsub::conf::{Options, Settings};
use rpubsub::{Bus, Handler, Listen, Publish, Subscribe};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let settings = Settings::init(Options::default())?;
    let _logger = rpubsub::logger::logger_init(&settings.log)?;
    Settings::logs()?;

    let bus = Bus::with_settings(&settings.bus);

    bus.subscribe(Subscribe::new(Handler::sync(|m, _| Ok(json!(format!("before {}", m))))).phase("before"))?;
    bus.subscribe(Subscribe::new(Handler::sync(|m, _| Ok(json!(format!("after {}", m))))))?;

    bus.listen(
        Listen::new(
            "Orders.cart",
            Handler::async_fn(|_, p, next| {
                let p = p.clone();
                tokio::spawn(async move {
                    tokio::time::sleep(Duration::from_millis(50)).await;
                    next.complete(json!({ "stored": p }));
                });
            }),
        )
        .channel("Store"),
    )?;
    bus.once(Listen::new("Orders.cart.updated", Handler::sync(|_, _| Ok(json!("first update")))).channel("Ui"))?;
    bus.listen(Listen::new("Orders.*", Handler::sync(|m, _| Ok(json!(format!("global {}", m))))))?;
    bus.add_route("orders", ["Store", "Ui"])?;

    for n in 0..2 {
        bus.publish(
            Publish::new(["Orders.cart.updated.ITEM", "Orders.cart.cleared"])
                .route("orders")
                .payload(json!({ "n": n }))
                .on_publish(|v| println!("  {}", v))
                .on_complete(move || println!("publish {} complete", n)),
        )
        .await?;
    }

    println!("{}", bus.stats());
    Ok(())
}
