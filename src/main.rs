use rocket::launch;

use mops_crawler::{config, logging, web, AppContext};

#[launch]
fn rocket() -> _ {
    dotenv::dotenv().ok();

    let context = match AppContext::new(&config::SETTINGS) {
        Ok(context) => context,
        Err(why) => {
            logging::error_console(format!("Failed to build application context: {}", why));
            panic!("cannot start without application context");
        }
    };

    logging::info_file_async("mops_crawler starting".to_string());

    rocket::build().manage(context).mount("/api", web::routes())
}
